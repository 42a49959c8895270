//! # DuplexMCP Protocol
//!
//! JSON-RPC 2.0 envelope, Model Context Protocol payload types, protocol
//! version negotiation, and the wire codec shared by every DuplexMCP
//! transport.
//!
//! The crate is transport-agnostic: it knows nothing about HTTP, SSE, or
//! sessions. Higher layers feed raw bytes through [`codec::decode`] and
//! resolve typed payloads with [`codec::parse_result_as`].

pub mod codec;
pub mod error;
pub mod jsonrpc;
pub mod methods;
pub mod types;
pub mod version;

pub use codec::MessageKind;
pub use error::{error_codes, Error, Result};
pub use jsonrpc::{
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    JsonRpcResponsePayload, JsonRpcVersion, MessageId, ResponseId,
};
pub use version::{PROTOCOL_2024_11_05, PROTOCOL_2025_03_26, SUPPORTED_VERSIONS};
