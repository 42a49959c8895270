//! Protocol error types and JSON-RPC code mapping

use serde_json::Value;
use std::time::Duration;

use crate::jsonrpc::JsonRpcError;

/// JSON-RPC and MCP error codes
pub mod error_codes {
    /// Malformed JSON
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid message envelope
    pub const INVALID_REQUEST: i32 = -32600;
    /// Unknown method
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameters
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Request received before `initialize` completed
    pub const SERVER_NOT_INITIALIZED: i32 = -32002;
    /// Request on a terminated session
    pub const SESSION_TERMINATED: i32 = -32004;
    /// Lower bound of the application-defined range
    pub const SERVER_ERROR_RANGE_MIN: i32 = -32099;
    /// Upper bound of the application-defined range
    pub const SERVER_ERROR_RANGE_MAX: i32 = -32000;
}

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Protocol error taxonomy.
///
/// `Cancelled` and `Timeout` are local error kinds: they are never encoded
/// into a response; the peer learns about them via stream closure or an
/// explicit `notifications/cancelled`.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Malformed JSON on the wire
    #[error("Parse error: {0}")]
    Parse(String),

    /// Structurally invalid envelope
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown method
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Parameters failed to decode or validate
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// Handler or framework failure
    #[error("Internal error: {0}")]
    Internal(String),

    /// Method other than `initialize` before the handshake completed
    #[error("Server not initialized")]
    NotInitialized,

    /// Request addressed to a terminated session
    #[error("Session terminated")]
    SessionTerminated,

    /// Locally observed cancellation; never serialized into a response
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Locally observed deadline expiry; never serialized into a response
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Structured error received from (or destined for) the peer
    #[error("{message} (code {code})")]
    Rpc {
        /// JSON-RPC error code
        code: i32,
        /// Error message
        message: String,
        /// Additional error data
        data: Option<Value>,
    },

    /// JSON encode/decode failure outside the envelope itself
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create an invalid-request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Create a method-not-found error
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::MethodNotFound(method.into())
    }

    /// Create an invalid-params error
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a cancellation error
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled(reason.into())
    }

    /// Create a structured RPC error
    pub fn rpc(code: i32, message: impl Into<String>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// The JSON-RPC code this error maps to
    pub fn code(&self) -> i32 {
        match self {
            Self::Parse(_) => error_codes::PARSE_ERROR,
            Self::InvalidRequest(_) => error_codes::INVALID_REQUEST,
            Self::MethodNotFound(_) => error_codes::METHOD_NOT_FOUND,
            Self::InvalidParams(_) => error_codes::INVALID_PARAMS,
            Self::NotInitialized => error_codes::SERVER_NOT_INITIALIZED,
            Self::SessionTerminated => error_codes::SESSION_TERMINATED,
            Self::Rpc { code, .. } => *code,
            // Local kinds collapse to internal if they ever reach a response
            Self::Internal(_)
            | Self::Cancelled(_)
            | Self::Timeout(_)
            | Self::Serialization(_) => error_codes::INTERNAL_ERROR,
        }
    }

    /// Whether this error is a locally observed cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Convert into a wire error object
    pub fn to_json_rpc_error(&self) -> JsonRpcError {
        let data = match self {
            Self::Rpc { data, .. } => data.clone(),
            _ => None,
        };
        JsonRpcError {
            code: self.code(),
            message: self.to_string(),
            data,
        }
    }
}

impl From<JsonRpcError> for Error {
    fn from(error: JsonRpcError) -> Self {
        match error.code {
            error_codes::METHOD_NOT_FOUND => Self::MethodNotFound(error.message),
            error_codes::INVALID_PARAMS => Self::InvalidParams(error.message),
            error_codes::SERVER_NOT_INITIALIZED => Self::NotInitialized,
            error_codes::SESSION_TERMINATED => Self::SessionTerminated,
            code => Self::Rpc {
                code,
                message: error.message,
                data: error.data,
            },
        }
    }
}
