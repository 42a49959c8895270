//! Elicitation types (server-initiated user input).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `elicitation/create` request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElicitRequest {
    /// Message shown to the user
    pub message: String,
    /// JSON Schema describing the expected answer
    #[serde(rename = "requestedSchema")]
    pub requested_schema: Value,
}

/// User decision on an elicitation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElicitAction {
    /// User supplied the requested content
    Accept,
    /// User explicitly declined
    Decline,
    /// User dismissed without answering
    Cancel,
}

/// `elicitation/create` result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElicitResult {
    /// The user's decision
    pub action: ElicitAction,
    /// Submitted content when `action == accept`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}
