//! # JSON-RPC 2.0 Envelope
//!
//! Message envelope types shared by every transport: requests, responses,
//! notifications, errors, and batches. Identifiers round-trip exactly
//! (a string id stays a string, a numeric id stays a number).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// JSON-RPC version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC version type
///
/// Serializes as the literal `"2.0"` and rejects anything else on decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonRpcVersion;

impl Serialize for JsonRpcVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(JSONRPC_VERSION)
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let version = String::deserialize(deserializer)?;
        if version == JSONRPC_VERSION {
            Ok(JsonRpcVersion)
        } else {
            Err(serde::de::Error::custom(format!(
                "Invalid JSON-RPC version: expected '{JSONRPC_VERSION}', got '{version}'"
            )))
        }
    }
}

/// Request identifier: a JSON string or integer.
///
/// JSON-RPC 2.0 allows both forms and requires servers to echo the exact
/// form back, so the two variants are kept distinct through decode/encode.
/// `MessageId` is `Hash + Eq` and is used directly as the correlation key
/// in pending-request maps; `"7"` and `7` are different keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    /// Numeric identifier
    Number(i64),
    /// String identifier
    String(String),
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for MessageId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

/// JSON-RPC request message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version
    pub jsonrpc: JsonRpcVersion,
    /// Request method name
    pub method: String,
    /// Request parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Request identifier
    pub id: MessageId,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request
    pub fn new(method: impl Into<String>, params: Option<Value>, id: MessageId) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            method: method.into(),
            params,
            id,
        }
    }

    /// Create a request with serializable parameters
    pub fn with_params<P: Serialize>(
        method: impl Into<String>,
        params: P,
        id: MessageId,
    ) -> Result<Self, serde_json::Error> {
        let params = serde_json::to_value(params)?;
        Ok(Self::new(method, Some(params), id))
    }

    /// Decode the parameters into a typed value
    ///
    /// Missing params decode as JSON `null`, which succeeds for types with
    /// all-optional fields.
    pub fn params_as<P: serde::de::DeserializeOwned>(&self) -> Result<P, serde_json::Error> {
        match &self.params {
            Some(p) => serde_json::from_value(p.clone()),
            None => serde_json::from_value(Value::Null),
        }
    }
}

/// JSON-RPC notification message (no response expected)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// JSON-RPC version
    pub jsonrpc: JsonRpcVersion,
    /// Notification method name
    pub method: String,
    /// Notification parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Create a new JSON-RPC notification
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            method: method.into(),
            params,
        }
    }

    /// Create a notification with serializable parameters
    pub fn with_params<P: Serialize>(
        method: impl Into<String>,
        params: P,
    ) -> Result<Self, serde_json::Error> {
        let params = serde_json::to_value(params)?;
        Ok(Self::new(method, Some(params)))
    }

    /// Decode the parameters into a typed value
    pub fn params_as<P: serde::de::DeserializeOwned>(&self) -> Result<P, serde_json::Error> {
        match &self.params {
            Some(p) => serde_json::from_value(p.clone()),
            None => serde_json::from_value(Value::Null),
        }
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code
    pub code: i32,
    /// Error message
    pub message: String,
    /// Additional error data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Create an error object from a code and message
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach extra data to the error
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Response payload - mutual exclusion of `result` and `error`
///
/// A message carrying both fields is rejected at the codec layer (untagged
/// deserialization alone would silently prefer `result`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcResponsePayload {
    /// Successful response
    Success {
        /// Response result
        result: Value,
    },
    /// Error response
    Error {
        /// Response error
        error: JsonRpcError,
    },
}

/// Response ID - `null` only for parse errors where no id could be read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponseId(pub Option<MessageId>);

impl ResponseId {
    /// Response ID echoing a request
    pub fn from_request(id: MessageId) -> Self {
        Self(Some(id))
    }

    /// Null response ID (parse error)
    pub fn null() -> Self {
        Self(None)
    }

    /// Get the request ID if present
    pub fn as_message_id(&self) -> Option<&MessageId> {
        self.0.as_ref()
    }
}

/// JSON-RPC response message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version
    pub jsonrpc: JsonRpcVersion,
    /// Response payload (either result or error, never both)
    #[serde(flatten)]
    pub payload: JsonRpcResponsePayload,
    /// Request identifier being answered
    pub id: ResponseId,
}

impl JsonRpcResponse {
    /// Create a successful response
    pub fn success(result: Value, id: MessageId) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            payload: JsonRpcResponsePayload::Success { result },
            id: ResponseId::from_request(id),
        }
    }

    /// Create an error response for a known request id
    pub fn error(error: JsonRpcError, id: MessageId) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            payload: JsonRpcResponsePayload::Error { error },
            id: ResponseId::from_request(id),
        }
    }

    /// Create a parse-error response (id is null)
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            payload: JsonRpcResponsePayload::Error {
                error: JsonRpcError::new(crate::error_codes::PARSE_ERROR, message),
            },
            id: ResponseId::null(),
        }
    }

    /// Check if this is a successful response
    pub fn is_success(&self) -> bool {
        matches!(self.payload, JsonRpcResponsePayload::Success { .. })
    }

    /// Get the result if this is a success response
    pub fn result(&self) -> Option<&Value> {
        match &self.payload {
            JsonRpcResponsePayload::Success { result } => Some(result),
            JsonRpcResponsePayload::Error { .. } => None,
        }
    }

    /// Get the error if this is an error response
    pub fn rpc_error(&self) -> Option<&JsonRpcError> {
        match &self.payload {
            JsonRpcResponsePayload::Success { .. } => None,
            JsonRpcResponsePayload::Error { error } => Some(error),
        }
    }

    /// Get the request ID this response answers
    pub fn message_id(&self) -> Option<&MessageId> {
        self.id.as_message_id()
    }
}

/// JSON-RPC message: the union of everything that can appear on the wire.
///
/// Variant order matters for untagged deserialization: a request carries a
/// mandatory `id` and `method`, a notification only `method`, a response
/// `id` plus `result`/`error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// Request message
    Request(JsonRpcRequest),
    /// Notification message
    Notification(JsonRpcNotification),
    /// Response message
    Response(JsonRpcResponse),
    /// Batch of messages
    Batch(Vec<JsonRpcMessage>),
}

impl JsonRpcMessage {
    /// Method name, if this is a request or notification
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(r) => Some(&r.method),
            Self::Notification(n) => Some(&n.method),
            _ => None,
        }
    }
}

impl From<JsonRpcRequest> for JsonRpcMessage {
    fn from(r: JsonRpcRequest) -> Self {
        Self::Request(r)
    }
}

impl From<JsonRpcNotification> for JsonRpcMessage {
    fn from(n: JsonRpcNotification) -> Self {
        Self::Notification(n)
    }
}

impl From<JsonRpcResponse> for JsonRpcMessage {
    fn from(r: JsonRpcResponse) -> Self {
        Self::Response(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_version_round_trip() {
        let json = serde_json::to_string(&JsonRpcVersion).unwrap();
        assert_eq!(json, "\"2.0\"");
        let parsed: JsonRpcVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, JsonRpcVersion);
    }

    #[test]
    fn test_version_rejects_unknown() {
        let result: Result<JsonRpcVersion, _> = serde_json::from_str("\"1.0\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_message_id_preserves_form() {
        let numeric: MessageId = serde_json::from_str("7").unwrap();
        assert_eq!(numeric, MessageId::Number(7));
        assert_eq!(serde_json::to_string(&numeric).unwrap(), "7");

        let string: MessageId = serde_json::from_str("\"7\"").unwrap();
        assert_eq!(string, MessageId::String("7".to_string()));
        assert_eq!(serde_json::to_string(&string).unwrap(), "\"7\"");

        // Distinct correlation keys
        assert_ne!(numeric, string);
    }

    #[test]
    fn test_request_round_trip() {
        let request = JsonRpcRequest::new(
            "tools/call",
            Some(json!({"name": "greet"})),
            MessageId::Number(2),
        );
        let json = serde_json::to_string(&request).unwrap();
        let parsed: JsonRpcRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.method, "tools/call");
        assert_eq!(parsed.id, MessageId::Number(2));
        assert_eq!(parsed.params, request.params);
    }

    #[test]
    fn test_notification_has_no_id() {
        let raw = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        let message: JsonRpcMessage = serde_json::from_str(raw).unwrap();
        assert!(matches!(message, JsonRpcMessage::Notification(_)));
    }

    #[test]
    fn test_request_classified_before_notification() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#;
        let message: JsonRpcMessage = serde_json::from_str(raw).unwrap();
        assert!(matches!(message, JsonRpcMessage::Request(_)));
    }

    #[test]
    fn test_success_response() {
        let response = JsonRpcResponse::success(json!({"ok": true}), MessageId::Number(1));
        assert!(response.is_success());
        assert!(response.result().is_some());
        assert!(response.rpc_error().is_none());
        assert_eq!(response.message_id(), Some(&MessageId::Number(1)));
    }

    #[test]
    fn test_error_response_round_trip() {
        let response = JsonRpcResponse::error(
            JsonRpcError::new(-32601, "Method not found"),
            MessageId::String("a".into()),
        );
        let json = serde_json::to_string(&response).unwrap();
        let parsed: JsonRpcResponse = serde_json::from_str(&json).unwrap();
        assert!(!parsed.is_success());
        assert_eq!(parsed.rpc_error().unwrap().code, -32601);
    }

    #[test]
    fn test_parse_error_has_null_id() {
        let response = JsonRpcResponse::parse_error("bad json");
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["id"], Value::Null);
        assert_eq!(value["error"]["code"], json!(-32700));
    }

    #[test]
    fn test_batch_message() {
        let raw = r#"[{"jsonrpc":"2.0","id":1,"method":"ping"},{"jsonrpc":"2.0","method":"notifications/initialized"}]"#;
        let message: JsonRpcMessage = serde_json::from_str(raw).unwrap();
        match message {
            JsonRpcMessage::Batch(items) => assert_eq!(items.len(), 2),
            other => panic!("expected batch, got {other:?}"),
        }
    }

    #[test]
    fn test_extra_fields_tolerated() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"method":"ping","params":{},"futureField":42}"#;
        let parsed: JsonRpcRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.method, "ping");
    }
}
