//! Server error types and handling

use duplexmcp_protocol::JsonRpcError;
use duplexmcp_transport::TransportError;

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

/// Server error taxonomy.
///
/// Everything crossing the dispatch boundary is converted to a JSON-RPC
/// error object; structured protocol errors keep their codes, everything
/// else collapses to `-32603`.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ServerError {
    /// Protocol-level error (codes preserved when answering)
    #[error("Protocol error: {0}")]
    Protocol(#[from] duplexmcp_protocol::Error),

    /// Transport layer error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Application handler failure
    #[error("Handler error: {message}")]
    Handler {
        /// Error message
        message: String,
        /// Optional handler context (tool / prompt / resource name)
        context: Option<String>,
    },

    /// Registry failure
    #[error("Registry error: {0}")]
    Registry(String),

    /// Routing failure
    #[error("Routing error: {message}")]
    Routing {
        /// Error message
        message: String,
        /// Method that failed to route
        method: Option<String>,
    },

    /// Internal server error
    #[error("Internal server error: {0}")]
    Internal(String),

    /// JSON encode/decode failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ServerError {
    /// Create a handler error
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
            context: None,
        }
    }

    /// Create a handler error with context
    pub fn handler_with_context(message: impl Into<String>, context: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
            context: Some(context.into()),
        }
    }

    /// Create a routing error for a method
    pub fn routing(message: impl Into<String>, method: impl Into<String>) -> Self {
        Self::Routing {
            message: message.into(),
            method: Some(method.into()),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether this error stems from a cancellation
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Protocol(e) => e.is_cancelled(),
            Self::Transport(e) => e.is_cancelled(),
            _ => false,
        }
    }

    /// Convert into a wire error object.
    ///
    /// Structured protocol errors keep their codes; application errors
    /// become `-32603`.
    pub fn to_json_rpc_error(&self) -> JsonRpcError {
        match self {
            Self::Protocol(e) => e.to_json_rpc_error(),
            other => JsonRpcError::new(
                duplexmcp_protocol::error_codes::INTERNAL_ERROR,
                other.to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duplexmcp_protocol::Error;

    #[test]
    fn test_structured_codes_survive() {
        let err = ServerError::Protocol(Error::rpc(-32042, "quota"));
        assert_eq!(err.to_json_rpc_error().code, -32042);
    }

    #[test]
    fn test_handler_errors_become_internal() {
        let err = ServerError::handler("boom");
        assert_eq!(err.to_json_rpc_error().code, -32603);
    }

    #[test]
    fn test_method_not_found_code() {
        let err = ServerError::Protocol(Error::method_not_found("nope"));
        assert_eq!(err.to_json_rpc_error().code, -32601);
    }
}
