//! Typed server context handed to handlers and middleware.
//!
//! Wraps the transport [`RequestContext`] with the typed server-initiated
//! operations (sampling, roots, elicitation, ping) and the logging
//! channel. Capability gating uses what the client declared at
//! `initialize`: calling a family the client did not declare fails with
//! method-not-found.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use duplexmcp_protocol::codec::parse_result_as;
use duplexmcp_protocol::types::{
    ClientCapabilities, CreateMessageRequest, CreateMessageResult, ElicitRequest, ElicitResult,
    ListRootsResult, LoggingLevel, LoggingMessageNotification,
};
use duplexmcp_protocol::{methods, Error, JsonRpcResponse, JsonRpcResponsePayload};
use duplexmcp_transport::{RequestContext, Session};

use crate::error::{ServerError, ServerResult};

/// Per-request server context.
#[derive(Debug, Clone)]
pub struct ServerCtx {
    inner: RequestContext,
}

impl ServerCtx {
    /// Wrap a transport context.
    pub fn new(inner: RequestContext) -> Self {
        Self { inner }
    }

    /// The underlying transport context.
    pub fn transport(&self) -> &RequestContext {
        &self.inner
    }

    /// The session this request belongs to, if any.
    pub fn session(&self) -> Option<&Arc<Session>> {
        self.inner.session()
    }

    /// The request's cancellation token.
    pub fn cancel_token(&self) -> &CancellationToken {
        self.inner.cancel_token()
    }

    /// Whether the request has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Ask the client's model for a completion.
    ///
    /// Requires the session to have declared the `sampling` capability.
    pub async fn create_message(
        &self,
        request: CreateMessageRequest,
    ) -> ServerResult<CreateMessageResult> {
        self.require_capability(methods::SAMPLING_CREATE_MESSAGE, |caps| {
            caps.sampling.is_some()
        })?;
        let response = self
            .inner
            .request_client(
                methods::SAMPLING_CREATE_MESSAGE,
                Some(serde_json::to_value(&request)?),
            )
            .await?;
        unwrap_response(response)
    }

    /// List the client's filesystem roots.
    ///
    /// Requires the session to have declared the `roots` capability.
    pub async fn list_roots(&self) -> ServerResult<ListRootsResult> {
        self.require_capability(methods::ROOTS_LIST, |caps| caps.roots.is_some())?;
        let response = self.inner.request_client(methods::ROOTS_LIST, None).await?;
        unwrap_response(response)
    }

    /// Ask the user for structured input.
    ///
    /// Requires the session to have declared the `elicitation` capability.
    pub async fn elicit(&self, request: ElicitRequest) -> ServerResult<ElicitResult> {
        self.require_capability(methods::ELICITATION_CREATE, |caps| {
            caps.elicitation.is_some()
        })?;
        let response = self
            .inner
            .request_client(
                methods::ELICITATION_CREATE,
                Some(serde_json::to_value(&request)?),
            )
            .await?;
        unwrap_response(response)
    }

    /// Ping the client over the active stream.
    pub async fn ping_client(&self) -> ServerResult<()> {
        let response = self.inner.request_client(methods::PING, None).await?;
        match response.payload {
            JsonRpcResponsePayload::Success { .. } => Ok(()),
            JsonRpcResponsePayload::Error { error } => {
                Err(ServerError::Protocol(Error::from(error)))
            }
        }
    }

    /// Emit a `notifications/message` to the client, honoring the
    /// session's `logging/setLevel` floor.
    pub fn log_message(
        &self,
        level: LoggingLevel,
        logger: Option<&str>,
        data: Value,
    ) -> ServerResult<()> {
        if let Some(session) = self.session() {
            if let Some(min) = session.min_log_level() {
                if level < min {
                    return Ok(());
                }
            }
        }
        let payload = LoggingMessageNotification {
            level,
            logger: logger.map(str::to_owned),
            data,
        };
        self.notify(methods::NOTIFICATION_MESSAGE, Some(serde_json::to_value(&payload)?))
    }

    /// Send an arbitrary notification to the client.
    pub fn notify(&self, method: &str, params: Option<Value>) -> ServerResult<()> {
        self.inner.notify_client(method, params)?;
        Ok(())
    }

    fn require_capability(
        &self,
        method: &str,
        check: impl Fn(&ClientCapabilities) -> bool,
    ) -> ServerResult<()> {
        let Some(session) = self.session() else {
            // Stateless dispatch carries no declaration to check.
            return Ok(());
        };
        let declared = session
            .client_capabilities()
            .is_some_and(|caps| check(&caps));
        if declared {
            Ok(())
        } else {
            debug!(method, session_id = %session.id(), "capability not declared by client");
            Err(ServerError::Protocol(Error::method_not_found(method)))
        }
    }
}

fn unwrap_response<T: serde::de::DeserializeOwned>(response: JsonRpcResponse) -> ServerResult<T> {
    match response.payload {
        JsonRpcResponsePayload::Success { result } => {
            parse_result_as(&result).map_err(ServerError::Protocol)
        }
        JsonRpcResponsePayload::Error { error } => Err(ServerError::Protocol(Error::from(error))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duplexmcp_transport::{RequestContext, SessionStore};
    use std::time::Duration;

    fn session_ctx(capabilities: Option<ClientCapabilities>) -> ServerCtx {
        let store = SessionStore::new(Duration::from_secs(60), Duration::from_secs(60), 16);
        let session = store.create();
        if let Some(caps) = capabilities {
            session.set_client_capabilities(caps);
        }
        ServerCtx::new(RequestContext::for_session(session))
    }

    #[tokio::test]
    async fn test_sampling_requires_declared_capability() {
        let ctx = session_ctx(Some(ClientCapabilities::default()));
        let err = ctx
            .create_message(CreateMessageRequest::from_text("hi"))
            .await
            .unwrap_err();
        assert_eq!(err.to_json_rpc_error().code, -32601);
    }

    #[tokio::test]
    async fn test_roots_requires_declared_capability() {
        let ctx = session_ctx(None);
        let err = ctx.list_roots().await.unwrap_err();
        assert_eq!(err.to_json_rpc_error().code, -32601);
    }

    #[tokio::test]
    async fn test_log_message_respects_level_floor() {
        let ctx = session_ctx(Some(ClientCapabilities::default()));
        let session = ctx.session().unwrap().clone();
        session.set_min_log_level(LoggingLevel::Warning);
        // No stream is attached; a filtered message must not error since it
        // is dropped before reaching the transport.
        ctx.log_message(LoggingLevel::Debug, None, serde_json::json!({"x": 1}))
            .unwrap();
    }

    #[tokio::test]
    async fn test_log_message_at_level_goes_to_buffer() {
        let ctx = session_ctx(Some(ClientCapabilities::default()));
        let session = ctx.session().unwrap().clone();
        session.set_min_log_level(LoggingLevel::Info);
        ctx.log_message(LoggingLevel::Error, Some("core"), serde_json::json!({}))
            .unwrap();
        // Buffered for the notification stream
        let mut rx = session.open_notification_stream(Some(0)).unwrap();
        let frame = rx.try_recv().unwrap();
        assert!(frame.data.contains("notifications/message"));
    }
}
