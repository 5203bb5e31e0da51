//! Error types for the beer game client.

use std::fmt;

use thiserror::Error;

/// Errors that can occur when using the beer game client.
#[derive(Debug, Error)]
pub enum BeerGameError {
    /// Failed to send a frame over the streaming channel.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a frame from the streaming channel.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The streaming channel was closed.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a wire message or payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The client has been shut down and no longer accepts operations.
    #[error("not connected to server")]
    NotConnected,

    /// The server reported errors for a specific operation.
    #[error("operation failed: {0}")]
    Operation(OperationError),

    /// A payload violated the game data contract.
    #[error("data contract violation: {0}")]
    Contract(#[from] ContractError),

    /// The document contains no query, mutation or subscription definition.
    #[error("document has no executable operation")]
    UnsupportedOperation,

    /// The operation was handed to the channel that cannot carry it.
    #[error("{kind} operation cannot be sent over the {channel} channel")]
    WrongChannel {
        /// Kind of the rejected operation.
        kind: crate::operation::OperationKind,
        /// Channel that rejected it.
        channel: &'static str,
    },

    /// The request/response channel failed.
    #[error("http error: {0}")]
    Http(String),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<OperationError> for BeerGameError {
    fn from(err: OperationError) -> Self {
        Self::Operation(err)
    }
}

/// The failure of one GraphQL operation.
///
/// Cloneable so it can live inside a subscription's view state; it never
/// affects sibling operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationError {
    /// Server (or decoding) messages, in the order they were reported.
    pub messages: Vec<String>,
}

impl OperationError {
    /// Create an error from a single message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            messages: vec![message.into()],
        }
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.messages.is_empty() {
            return f.write_str("unknown error");
        }
        f.write_str(&self.messages.join("; "))
    }
}

impl std::error::Error for OperationError {}

impl From<ContractError> for OperationError {
    fn from(err: ContractError) -> Self {
        Self::new(err.to_string())
    }
}

/// Violations of the game data contract that the client refuses to paper over.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractError {
    /// A player's history series do not all have the same length.
    #[error("history series for player `{player}` have unequal lengths {lengths:?}")]
    UnevenHistory {
        /// Display name of the offending player.
        player: String,
        /// Lengths of incoming, outgoing, stock/backlog, delivered and cost series.
        lengths: [usize; 5],
    },
}

/// A specialized [`Result`] type for beer game client operations.
pub type Result<T> = std::result::Result<T, BeerGameError>;
