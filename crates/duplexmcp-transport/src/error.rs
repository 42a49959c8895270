//! Transport error types.

use std::time::Duration;

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Transport layer errors
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
    /// Socket / listener failures
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unknown, expired, or terminated session
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The SSE stream this operation targets is gone
    #[error("Stream closed")]
    StreamClosed,

    /// Server-initiated call without an active stream to carry it
    #[error("No active stream for server-initiated message")]
    NoChannel,

    /// `Last-Event-ID` points before the replay window
    #[error("Replay window exceeded: event {requested} evicted (oldest retained: {oldest})")]
    ReplayWindowExceeded {
        /// First event id the client still needs
        requested: u64,
        /// Oldest event id still buffered
        oldest: u64,
    },

    /// Deadline elapsed while waiting for the peer
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Operation cancelled by ctx, disconnect, or teardown
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// JSON encode/decode failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TransportError {
    /// Whether this error is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

impl From<TransportError> for duplexmcp_protocol::Error {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Timeout(d) => Self::Timeout(d),
            TransportError::Cancelled(reason) => Self::Cancelled(reason),
            TransportError::SessionNotFound(_) => Self::SessionTerminated,
            TransportError::Serialization(e) => Self::Serialization(e),
            other => Self::Internal(other.to_string()),
        }
    }
}
