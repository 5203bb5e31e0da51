//! Channel implementations for the beer game client.
//!
//! This module provides concrete [`Transport`](crate::Transport),
//! [`Connector`](crate::Connector) and [`RequestChannel`](crate::RequestChannel)
//! implementations behind feature gates:
//!
//! | Feature                | Provides                                        |
//! |------------------------|-------------------------------------------------|
//! | `transport-websocket`  | [`WebSocketTransport`], [`WebSocketConnector`]  |
//! | `transport-http`       | [`HttpRequestChannel`]                          |

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-http")]
pub mod http;

#[cfg(feature = "transport-websocket")]
pub use websocket::{WebSocketConnector, WebSocketTransport};

#[cfg(feature = "transport-http")]
pub use http::HttpRequestChannel;
