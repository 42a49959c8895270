//! Request context and the transport-facing service contract.
//!
//! Every dispatch path carries a [`RequestContext`]: the cancellation token
//! for the call, the session handle (absent in stateless mode), and — while
//! a POST-SSE response stream is open — the server→client channel used for
//! sampling, roots, and elicitation. Nothing here lives in globals.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use duplexmcp_protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

use crate::channel::{wait_for_response, ServerChannel};
use crate::error::{TransportError, TransportResult};
use crate::session::Session;

/// Default deadline for server-initiated calls.
const DEFAULT_SERVER_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Per-request context handed to the service on every dispatch.
#[derive(Debug, Clone)]
pub struct RequestContext {
    session: Option<Arc<Session>>,
    channel: Option<ServerChannel>,
    cancel: CancellationToken,
    server_request_timeout: Duration,
}

impl RequestContext {
    /// A context with no session and a fresh token (stateless dispatch,
    /// tests).
    pub fn detached() -> Self {
        Self {
            session: None,
            channel: None,
            cancel: CancellationToken::new(),
            server_request_timeout: DEFAULT_SERVER_REQUEST_TIMEOUT,
        }
    }

    /// A context scoped to a session. The request token is a child of the
    /// session token, so session termination cancels in-flight requests.
    pub fn for_session(session: Arc<Session>) -> Self {
        let cancel = session.cancel_token().child_token();
        Self {
            session: Some(session),
            channel: None,
            cancel,
            server_request_timeout: DEFAULT_SERVER_REQUEST_TIMEOUT,
        }
    }

    /// Attach the server→client channel of the in-flight SSE stream.
    pub fn with_channel(mut self, channel: ServerChannel) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Replace the cancellation token (transport wiring).
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Override the server-initiated call deadline.
    pub fn with_server_request_timeout(mut self, timeout: Duration) -> Self {
        self.server_request_timeout = timeout;
        self
    }

    /// The session this request belongs to, if any.
    pub fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    /// The server→client channel, if an SSE stream is open for this call.
    pub fn channel(&self) -> Option<&ServerChannel> {
        self.channel.as_ref()
    }

    /// The cancellation token for this request.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the request has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Issue a JSON-RPC request to the client.
    ///
    /// Uses the in-flight POST-SSE stream when one is open for this call;
    /// otherwise the request is framed onto the session's notification
    /// stream (the legacy transport's path). Fails with
    /// [`TransportError::NoChannel`] when neither exists.
    pub async fn request_client(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> TransportResult<JsonRpcResponse> {
        if let Some(channel) = &self.channel {
            return channel.request(method, params, &self.cancel).await;
        }
        let session = self.session.as_ref().ok_or(TransportError::NoChannel)?;
        if !session.has_notification_stream() {
            return Err(TransportError::NoChannel);
        }
        let pending = session.pending();
        let id = pending.allocate_id();
        let rx = pending.register(id.clone());
        let request = JsonRpcRequest::new(method, params, id.clone());
        session.push_notification(serde_json::to_string(&request)?);
        wait_for_response(session, &id, rx, self.server_request_timeout, &self.cancel).await
    }

    /// Send a notification to the client.
    ///
    /// Prefers the in-flight stream; falls back to the session's
    /// notification stream buffer when no stream is open for this call.
    pub fn notify_client(&self, method: &str, params: Option<Value>) -> TransportResult<()> {
        if let Some(channel) = &self.channel {
            channel.notify(method, params)?;
            return Ok(());
        }
        if let Some(session) = &self.session {
            let notification = JsonRpcNotification::new(method, params);
            session.push_notification(serde_json::to_string(&notification)?);
            return Ok(());
        }
        Err(TransportError::NoChannel)
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::detached()
    }
}

/// The typed handler surface every transport dispatches into.
///
/// Implemented by the request router; transports decode the envelope,
/// resolve the session, and hand decoded messages here. One service
/// instance serves all three wire shapes.
#[async_trait]
pub trait McpService: Send + Sync + 'static {
    /// Handle a request and produce its response.
    async fn handle_request(&self, request: JsonRpcRequest, ctx: RequestContext)
        -> JsonRpcResponse;

    /// Handle a notification (no response).
    async fn handle_notification(&self, notification: JsonRpcNotification, ctx: RequestContext);
}
