//! # Beer Game Client
//!
//! Async client core for the beer distribution game.
//!
//! This crate talks to a beer game server over GraphQL: subscriptions share
//! one `graphql-transport-ws` streaming channel, queries and mutations go
//! over a plain request channel. On top of that it provides latched
//! subscriptions, identity resolution, a per-game phase controller and the
//! view data each phase renders from.
//!
//! ## Features
//!
//! - **Transport-agnostic**: implement [`Transport`] + [`Connector`] and
//!   [`RequestChannel`] for any backend
//! - **WebSocket built-in**: default `transport-websocket` feature provides
//!   [`WebSocketConnector`]
//! - **HTTP built-in**: default `transport-http` feature provides
//!   [`HttpRequestChannel`]
//! - **Reconnecting**: the streaming channel is kept alive and restored
//!   transparently; subscribers keep their last data
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # #[cfg(all(feature = "transport-websocket", feature = "transport-http"))]
//! # async fn run() -> Result<(), beer_game_client::BeerGameError> {
//! use beer_game_client::{ClientConfig, Entry, GameController, GraphQlClient, IdentityResolver};
//!
//! let mut client = GraphQlClient::connect(ClientConfig::for_origin("http://localhost:8080"));
//! let resolver = IdentityResolver::from_cookie_header("user-id=abc123");
//!
//! if let Entry::Ready(identity) = resolver.entry() {
//!     let mut controller = GameController::start(&client.handle(), "my-game", identity)?;
//!     while let Some(view) = controller.next().await {
//!         println!("{view}");
//!     }
//! }
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod close_codes;
pub mod controller;
pub mod effect;
pub mod error;
pub mod identity;
pub mod model;
pub mod operation;
pub mod protocol;
pub mod shipment;
pub mod subscription;
pub mod transport;
pub mod transports;
pub mod views;

// Re-export primary types for ergonomic imports.
pub use client::{ClientConfig, ClientHandle, Dispatch, GraphQlClient, RawSubscription, StreamEvent};
pub use close_codes::CloseCode;
pub use controller::{GameController, PhaseState};
pub use error::{BeerGameError, ContractError, OperationError};
pub use identity::{Entry, Identity, IdentityResolver};
pub use model::{Game, Phase, PlayerState};
pub use operation::{GraphQlOperation, OperationKind};
pub use protocol::{ClientMessage, GraphQlRequest, GraphQlResponse, ServerMessage};
pub use shipment::ShipmentDraft;
pub use subscription::{StableSubscription, SubscriptionState};
pub use transport::{Connector, RequestChannel, Transport};
pub use views::View;

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};

#[cfg(feature = "transport-http")]
pub use transports::HttpRequestChannel;
