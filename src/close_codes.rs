//! Close codes of the `graphql-transport-ws` sub-protocol.
//!
//! The server closes the streaming channel with one of these codes when it
//! rejects the connection itself (as opposed to a single operation, which is
//! reported with an `error` message).

use std::fmt;

/// Structured close codes sent by a `graphql-transport-ws` server.
///
/// Use [`description()`](CloseCode::description) for a human-readable explanation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// 4400: malformed message or protocol violation.
    BadRequest,
    /// 4401: an operation was sent before `connection_ack`.
    Unauthorized,
    /// 4403: the connection was refused during `connection_init`.
    Forbidden,
    /// 4406: the `graphql-transport-ws` sub-protocol was not negotiated.
    SubprotocolNotAcceptable,
    /// 4408: `connection_init` did not arrive in time.
    ConnectionInitTimeout,
    /// 4409: an operation id was reused while still active.
    SubscriberAlreadyExists,
    /// 4429: `connection_init` was sent more than once.
    TooManyInitialisationRequests,
    /// 4500: the server failed internally.
    InternalServerError,
}

impl CloseCode {
    /// Map a WebSocket close code to a known protocol code.
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            4400 => Some(Self::BadRequest),
            4401 => Some(Self::Unauthorized),
            4403 => Some(Self::Forbidden),
            4406 => Some(Self::SubprotocolNotAcceptable),
            4408 => Some(Self::ConnectionInitTimeout),
            4409 => Some(Self::SubscriberAlreadyExists),
            4429 => Some(Self::TooManyInitialisationRequests),
            4500 => Some(Self::InternalServerError),
            _ => None,
        }
    }

    /// The numeric code on the wire.
    pub fn as_u16(self) -> u16 {
        match self {
            Self::BadRequest => 4400,
            Self::Unauthorized => 4401,
            Self::Forbidden => 4403,
            Self::SubprotocolNotAcceptable => 4406,
            Self::ConnectionInitTimeout => 4408,
            Self::SubscriberAlreadyExists => 4409,
            Self::TooManyInitialisationRequests => 4429,
            Self::InternalServerError => 4500,
        }
    }

    /// Returns a human-readable description of this close code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::BadRequest => "The server could not understand a message sent by the client.",
            Self::Unauthorized => {
                "An operation was sent before the server acknowledged the connection."
            }
            Self::Forbidden => "The server refused the connection.",
            Self::SubprotocolNotAcceptable => {
                "The server does not speak the graphql-transport-ws sub-protocol."
            }
            Self::ConnectionInitTimeout => {
                "The connection was not initialised before the server's deadline."
            }
            Self::SubscriberAlreadyExists => {
                "A subscription id was reused while the original was still active."
            }
            Self::TooManyInitialisationRequests => {
                "The connection was initialised more than once."
            }
            Self::InternalServerError => "The server failed while handling the connection.",
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.as_u16())
    }
}
