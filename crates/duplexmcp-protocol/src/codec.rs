//! Wire codec: encode, decode, classify, and typed result parsing.
//!
//! This is the single canonical parsing pipeline for the runtime. Every
//! transport feeds raw bytes through [`decode`]; every typed caller resolves
//! discriminated result payloads through [`parse_result_as`].

use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::jsonrpc::{JsonRpcMessage, JSONRPC_VERSION};

/// Coarse message classification, computed without a full typed decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Request (`method` + `id`)
    Request,
    /// Notification (`method`, no `id`)
    Notification,
    /// Successful response (`result`)
    Response,
    /// Error response (`error`)
    ErrorResponse,
    /// Batch (JSON array)
    Batch,
}

/// Encode a message to compact JSON bytes.
pub fn encode(message: &JsonRpcMessage) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(message)?)
}

/// Encode a message to a compact JSON string.
pub fn encode_string(message: &JsonRpcMessage) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}

/// Decode a message from raw bytes.
///
/// Enforces the envelope rules untagged deserialization cannot express on
/// its own: the `jsonrpc` version marker must be present and exact, and a
/// response must not carry both `result` and `error`.
pub fn decode(bytes: &[u8]) -> Result<JsonRpcMessage> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| {
        debug!(error = %e, "failed to parse JSON-RPC payload");
        Error::Parse(e.to_string())
    })?;
    decode_value(value)
}

/// Decode a message from an already-parsed JSON value.
pub fn decode_value(value: Value) -> Result<JsonRpcMessage> {
    match &value {
        Value::Object(_) => validate_envelope(&value)?,
        Value::Array(items) => {
            if items.is_empty() {
                return Err(Error::invalid_request("empty batch"));
            }
            for item in items {
                validate_envelope(item)?;
            }
        }
        _ => return Err(Error::invalid_request("message must be an object or array")),
    }

    serde_json::from_value(value).map_err(|e| Error::invalid_request(e.to_string()))
}

/// Classify raw bytes without fully decoding them.
pub fn classify(bytes: &[u8]) -> Result<MessageKind> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| Error::Parse(e.to_string()))?;
    classify_value(&value)
}

/// Classify an already-parsed JSON value.
pub fn classify_value(value: &Value) -> Result<MessageKind> {
    match value {
        Value::Array(_) => Ok(MessageKind::Batch),
        Value::Object(obj) => {
            if obj.contains_key("method") {
                if obj.contains_key("id") {
                    Ok(MessageKind::Request)
                } else {
                    Ok(MessageKind::Notification)
                }
            } else if obj.contains_key("error") {
                Ok(MessageKind::ErrorResponse)
            } else if obj.contains_key("result") {
                Ok(MessageKind::Response)
            } else {
                Err(Error::invalid_request(
                    "message has neither method nor result/error",
                ))
            }
        }
        _ => Err(Error::invalid_request("message must be an object or array")),
    }
}

/// Parse a raw `result` payload into a typed value.
///
/// Unknown fields are tolerated for forward compatibility; missing required
/// fields or wrong discriminants fail with the decode error attached.
pub fn parse_result_as<T: serde::de::DeserializeOwned>(result: &Value) -> Result<T> {
    serde_json::from_value(result.clone())
        .map_err(|e| Error::invalid_request(format!("result payload mismatch: {e}")))
}

fn validate_envelope(value: &Value) -> Result<()> {
    let Some(obj) = value.as_object() else {
        return Err(Error::invalid_request("batch items must be objects"));
    };

    match obj.get("jsonrpc").and_then(Value::as_str) {
        Some(JSONRPC_VERSION) => {}
        Some(other) => {
            return Err(Error::invalid_request(format!(
                "unsupported jsonrpc version '{other}'"
            )))
        }
        None => return Err(Error::invalid_request("missing jsonrpc version")),
    }

    if obj.contains_key("result") && obj.contains_key("error") {
        return Err(Error::invalid_request(
            "response carries both result and error",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jsonrpc::{JsonRpcRequest, MessageId};
    use crate::types::{CallToolResult, ContentBlock, ReadResourceResult, ResourceContents};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_decode_encode_round_trip() {
        let original = JsonRpcMessage::Request(JsonRpcRequest::new(
            "tools/call",
            Some(json!({"name": "greet", "arguments": {"name": "Ada"}})),
            MessageId::Number(2),
        ));
        let bytes = encode(&original).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(
            serde_json::to_value(&decoded).unwrap(),
            serde_json::to_value(&original).unwrap()
        );
    }

    #[test]
    fn test_decode_rejects_bad_json() {
        let err = decode(b"{not json").unwrap_err();
        assert_eq!(err.code(), -32700);
    }

    #[test]
    fn test_decode_rejects_unknown_version() {
        let err = decode(br#"{"jsonrpc":"1.0","method":"ping","id":1}"#).unwrap_err();
        assert_eq!(err.code(), -32600);
    }

    #[test]
    fn test_decode_rejects_result_and_error() {
        let raw = br#"{"jsonrpc":"2.0","id":1,"result":{},"error":{"code":-32603,"message":"x"}}"#;
        let err = decode(raw).unwrap_err();
        assert_eq!(err.code(), -32600);
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            classify(br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).unwrap(),
            MessageKind::Request
        );
        assert_eq!(
            classify(br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap(),
            MessageKind::Notification
        );
        assert_eq!(
            classify(br#"{"jsonrpc":"2.0","id":1,"result":{}}"#).unwrap(),
            MessageKind::Response
        );
        assert_eq!(
            classify(br#"{"jsonrpc":"2.0","id":1,"error":{"code":-32603,"message":"x"}}"#).unwrap(),
            MessageKind::ErrorResponse
        );
        assert_eq!(classify(b"[]").unwrap(), MessageKind::Batch);
    }

    #[test]
    fn test_parse_tool_result_content_variants() {
        let result = json!({
            "content": [
                {"type": "text", "text": "hello"},
                {"type": "image", "data": "aGk=", "mimeType": "image/png"},
                {"type": "audio", "data": "aGk=", "mimeType": "audio/wav"},
                {"type": "resource", "resource": {"uri": "file:///x", "text": "body"}}
            ]
        });
        let parsed: CallToolResult = parse_result_as(&result).unwrap();
        assert_eq!(parsed.content.len(), 4);
        assert!(matches!(parsed.content[0], ContentBlock::Text(_)));
        assert!(matches!(parsed.content[3], ContentBlock::Resource(_)));
    }

    #[test]
    fn test_parse_result_rejects_unknown_content_type() {
        let result = json!({"content": [{"type": "video", "data": "x"}]});
        assert!(parse_result_as::<CallToolResult>(&result).is_err());
    }

    #[test]
    fn test_parse_resource_contents_text_xor_blob() {
        let result = json!({
            "contents": [
                {"uri": "file:///a", "text": "abc"},
                {"uri": "file:///b", "blob": "aGk=", "mimeType": "application/octet-stream"}
            ]
        });
        let parsed: ReadResourceResult = parse_result_as(&result).unwrap();
        assert!(matches!(parsed.contents[0], ResourceContents::Text(_)));
        assert!(matches!(parsed.contents[1], ResourceContents::Blob(_)));
    }

    #[test]
    fn test_parse_result_tolerates_extra_fields() {
        let result = json!({
            "content": [{"type": "text", "text": "hi", "futureField": 1}],
            "someNewField": true
        });
        let parsed: CallToolResult = parse_result_as(&result).unwrap();
        assert_eq!(parsed.content.len(), 1);
    }
}
