//! # DuplexMCP Transport
//!
//! The transport + session fabric of the DuplexMCP runtime: session
//! management, SSE framing with replay, the bidirectional server→client
//! channel, and the streamable HTTP server (plus the legacy 2024-11-05
//! two-path transport).
//!
//! The request router plugs in through [`McpService`]; transports decode
//! the wire envelope, resolve sessions, and dispatch decoded messages with
//! a [`RequestContext`] that carries the cancellation token, the session
//! handle, and — during POST-SSE calls — the server→client channel.

pub mod channel;
pub mod config;
pub mod context;
pub mod error;
pub mod legacy;
pub mod pending;
pub mod session;
pub mod sse;
pub mod streamable;

pub use channel::{OutboundStream, ServerChannel};
pub use config::{StreamableConfig, StreamableConfigBuilder};
pub use context::{McpService, RequestContext};
pub use error::{TransportError, TransportResult};
pub use legacy::{legacy_router, LegacyConfig};
pub use pending::{PendingRequests, SERVER_REQUEST_ID_PREFIX};
pub use session::{Session, SessionId, SessionState, SessionStore};
pub use sse::{EventBuffer, SseEncoder, SseEvent, SseParser};
pub use streamable::StreamableServer;

/// HTTP header names used by the streamable transport.
pub mod headers {
    /// Session id header, server→client on the `initialize` response and
    /// client→server on every subsequent call of the session
    pub const MCP_SESSION_ID: &str = "Mcp-Session-Id";

    /// Resumption header carrying the last received event id
    pub const LAST_EVENT_ID: &str = "Last-Event-ID";

    /// Content type of plain JSON responses
    pub const CONTENT_TYPE_JSON: &str = "application/json";

    /// Content type of SSE streams
    pub const CONTENT_TYPE_SSE: &str = "text/event-stream";
}
