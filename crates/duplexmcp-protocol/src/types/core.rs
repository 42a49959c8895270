//! Core shared types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::jsonrpc::MessageId;

/// Opaque pagination cursor
pub type Cursor = String;

/// Role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User role
    User,
    /// Assistant role
    Assistant,
}

/// Implementation information carried in `initialize` exchanges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Implementation {
    /// Implementation name
    pub name: String,
    /// Implementation version
    pub version: String,
}

impl Implementation {
    /// Create implementation info
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// A result that carries no data (e.g. `ping`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmptyResult {
    /// Optional response metadata
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// `notifications/cancelled` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelledNotification {
    /// Identifier of the request being cancelled
    #[serde(rename = "requestId")]
    pub request_id: MessageId,
    /// Optional human-readable reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
