use std::time::Duration;

use crate::envelope::ErrorObject;
use crate::remote::State;

/// Errors surfaced by [`Remote`](crate::Remote), [`Server`](crate::Server)
/// and [`Client`](crate::Client) operations.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] ezrpc_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] ezrpc_frame::FrameError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The other side answered the request with an error object.
    #[error("remote error {}: {}", .0.code, .0.message)]
    Remote(ErrorObject),

    /// No response arrived before the request deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The connection closed before the exchange completed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The connection does not accept new outgoing messages.
    #[error("connection is {0}")]
    NotOpen(State),

    /// Schema validation error.
    #[cfg(feature = "schema")]
    #[error("schema validation error: {0}")]
    Schema(#[from] ezrpc_schema::SchemaError),
}

impl RpcError {
    /// The error object, if the other side answered with one.
    pub fn as_remote(&self) -> Option<&ErrorObject> {
        match self {
            Self::Remote(error) => Some(error),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
