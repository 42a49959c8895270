//! Client error types.

use std::time::Duration;

use duplexmcp_protocol::JsonRpcError;

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Client error taxonomy.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ClientError {
    /// HTTP-level failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Unexpected HTTP status from the server
    #[error("Unexpected HTTP status: {0}")]
    UnexpectedStatus(reqwest::StatusCode),

    /// Envelope or payload violation
    #[error("Protocol error: {0}")]
    Protocol(#[from] duplexmcp_protocol::Error),

    /// Structured error response from the server
    #[error("{} (code {})", .0.message, .0.code)]
    Rpc(JsonRpcError),

    /// Session was swept or terminated server-side
    #[error("Session not found (expired or terminated)")]
    SessionNotFound,

    /// Operation requires a completed `initialize` handshake
    #[error("Client not initialized")]
    NotInitialized,

    /// The SSE stream ended before the awaited response arrived
    #[error("Stream ended before the response arrived")]
    StreamEnded,

    /// Deadline elapsed
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// JSON encode/decode failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
