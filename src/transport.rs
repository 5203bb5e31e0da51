//! Channel abstractions for the beer game client.
//!
//! The client talks to the server over two logical channels:
//!
//! - a **streaming channel**, a bidirectional text message connection carrying
//!   `graphql-transport-ws` frames ([`Transport`]). Since the channel is
//!   established lazily and re-established after failures, the client holds a
//!   [`Connector`] that can open a fresh [`Transport`] on demand.
//! - a **request channel** that executes one query or mutation and returns its
//!   result ([`RequestChannel`]).
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use beer_game_client::error::BeerGameError;
//! use beer_game_client::transport::Transport;
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), BeerGameError> {
//!         // Send the JSON text frame over your transport
//!         # let _ = message;
//!         Ok(())
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, BeerGameError>> {
//!         // Receive the next JSON text frame
//!         // Return None when the connection is closed cleanly
//!         None
//!     }
//!
//!     async fn close(&mut self) -> Result<(), BeerGameError> {
//!         Ok(())
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::BeerGameError;
use crate::protocol::{GraphQlRequest, GraphQlResponse};

/// A bidirectional text message transport for the streaming channel.
///
/// Each call to [`send`](Transport::send) transmits one complete JSON frame.
/// Each call to [`recv`](Transport::recv) returns one complete JSON frame.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method **MUST** be cancel-safe because it is used
/// inside `tokio::select!`. If `recv` is cancelled before completion, calling it
/// again must not lose data. Channel-based implementations (e.g., wrapping
/// `mpsc::Receiver`) are naturally cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text frame to the server.
    ///
    /// # Errors
    ///
    /// Returns [`BeerGameError::TransportSend`] if the frame could not be sent.
    async fn send(&mut self, message: String) -> Result<(), BeerGameError>;

    /// Receive the next JSON text frame from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))`: a complete frame was received
    /// - `Some(Err(e))`: a transport error occurred
    /// - `None`: the connection was closed cleanly by the server
    async fn recv(&mut self) -> Option<Result<String, BeerGameError>>;

    /// Close the transport connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails. Implementations should
    /// still release resources even if the close handshake fails.
    async fn close(&mut self) -> Result<(), BeerGameError>;
}

/// Opens new streaming-channel connections.
///
/// Called once when the first subscription is made and again every time the
/// channel has to be re-established.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a fresh, not yet initialised connection.
    async fn connect(&self) -> Result<Box<dyn Transport>, BeerGameError>;
}

/// Executes single request/response operations (queries and mutations).
///
/// Implementations must be safe to call concurrently: a failure of one
/// request must not affect any other.
#[async_trait]
pub trait RequestChannel: Send + Sync + 'static {
    /// Execute `request` and return the server's result.
    ///
    /// A response carrying GraphQL `errors` is still `Ok`; only channel-level
    /// failures are `Err`.
    async fn execute(&self, request: GraphQlRequest) -> Result<GraphQlResponse, BeerGameError>;
}
