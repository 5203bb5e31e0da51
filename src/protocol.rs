//! Wire types for both channels.
//!
//! The request/response channel carries a bare [`GraphQlRequest`] and gets a
//! [`GraphQlResponse`] back. The streaming channel speaks the
//! `graphql-transport-ws` sub-protocol: every frame is a JSON object tagged
//! by `type`, modelled here as [`ClientMessage`] and [`ServerMessage`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// WebSocket sub-protocol requested during the handshake.
pub const SUBPROTOCOL: &str = "graphql-transport-ws";

// ── GraphQL payloads ────────────────────────────────────────────────

/// One GraphQL operation as sent over either channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQlRequest {
    /// The operation document.
    pub query: String,
    /// Variables referenced by the document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,
    /// Name of the operation to execute when the document holds several.
    #[serde(
        rename = "operationName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub operation_name: Option<String>,
}

impl GraphQlRequest {
    /// Create a request for `query` without variables.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            variables: None,
            operation_name: None,
        }
    }

    /// Attach variables to the request.
    #[must_use]
    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = Some(variables);
        self
    }

    /// Attach an operation name to the request.
    #[must_use]
    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }
}

/// A single error entry of a GraphQL response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQlError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,
}

/// The result of one GraphQL execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphQlResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQlError>,
}

impl GraphQlResponse {
    /// Build a successful response carrying `data`.
    pub fn from_data(data: Value) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
        }
    }
}

// ── Streaming channel messages ──────────────────────────────────────

/// Message types sent from client to server over the streaming channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Opens the session; MUST be the first message on a new channel.
    ConnectionInit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Liveness probe; the server answers with `pong`.
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Answer to a server `ping`.
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Start streaming results for `payload` under operation `id`.
    Subscribe { id: String, payload: GraphQlRequest },
    /// Stop the operation `id`.
    Complete { id: String },
}

/// Message types sent from server to client over the streaming channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The server accepted `connection_init`.
    ConnectionAck {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Server-initiated liveness probe.
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Answer to a client `ping`.
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// One execution result for operation `id`.
    Next { id: String, payload: GraphQlResponse },
    /// Operation `id` failed before producing results.
    Error { id: String, payload: Vec<GraphQlError> },
    /// Operation `id` will produce no further results.
    Complete { id: String },
}
