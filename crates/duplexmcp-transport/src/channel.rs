//! Bidirectional channel: server→client requests over an active SSE stream.
//!
//! An [`OutboundStream`] is the write half of one SSE stream. Frames are
//! id-stamped and enqueued under a single lock, so messages emitted by one
//! task appear on the wire in emission order and ids stay strictly
//! increasing; fairness between concurrent emitters is not promised.
//!
//! A [`ServerChannel`] binds an outbound stream to a session's pending
//! waiter map: `request` frames a JSON-RPC request onto the stream, parks a
//! waiter, and resolves when the client's reply arrives on a later POST.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use duplexmcp_protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

use crate::error::{TransportError, TransportResult};
use crate::session::Session;
use crate::sse::SseEvent;

/// Write half of a single SSE stream.
pub struct OutboundStream {
    tx: mpsc::UnboundedSender<SseEvent>,
    next_id: Mutex<u64>,
}

impl OutboundStream {
    /// Create a stream and its frame receiver. Event ids start at 1.
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<SseEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                tx,
                next_id: Mutex::new(1),
            }),
            rx,
        )
    }

    /// Frame a JSON payload as a `message` event. Returns the event id.
    ///
    /// The id is assigned and the frame enqueued under one lock so ids and
    /// wire order always agree.
    pub fn send_json(&self, payload: &Value) -> TransportResult<u64> {
        let data = serde_json::to_string(payload)?;
        let mut next_id = self.next_id.lock();
        let id = *next_id;
        self.tx
            .send(SseEvent::with_id(id, data).with_event("message"))
            .map_err(|_| TransportError::StreamClosed)?;
        *next_id += 1;
        Ok(id)
    }

    /// Whether the read half is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl std::fmt::Debug for OutboundStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundStream")
            .field("next_id", &*self.next_id.lock())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Server→client request channel scoped to one in-flight SSE stream.
#[derive(Clone)]
pub struct ServerChannel {
    stream: Arc<OutboundStream>,
    session: Arc<Session>,
    timeout: Duration,
}

impl ServerChannel {
    /// Bind a stream to its session's waiter map.
    pub fn new(stream: Arc<OutboundStream>, session: Arc<Session>, timeout: Duration) -> Self {
        Self {
            stream,
            session,
            timeout,
        }
    }

    /// The session this channel belongs to.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Issue a JSON-RPC request to the client and await its response.
    ///
    /// The request id comes from the session's server-initiated namespace
    /// (`s-{n}`). The call resolves when the client's reply POST completes
    /// the waiter, and fails on deadline, cancellation, or stream closure.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        cancel: &CancellationToken,
    ) -> TransportResult<JsonRpcResponse> {
        let pending = self.session.pending();
        let id = pending.allocate_id();
        let rx = pending.register(id.clone());

        let request = JsonRpcRequest::new(method, params, id.clone());
        let frame = serde_json::to_value(&request)?;
        if let Err(e) = self.stream.send_json(&frame) {
            pending.remove(&id);
            return Err(e);
        }
        debug!(%id, method, "server-initiated request framed");

        wait_for_response(&self.session, &id, rx, self.timeout, cancel).await
    }

    /// Fire-and-forget notification onto the stream.
    pub fn notify(&self, method: &str, params: Option<Value>) -> TransportResult<u64> {
        let notification = JsonRpcNotification::new(method, params);
        let frame = serde_json::to_value(&notification)?;
        self.stream.send_json(&frame)
    }
}

/// Await the reply to a registered server-initiated request.
///
/// Shared by the POST-SSE channel and the notification-stream fallback used
/// by the legacy transport. The waiter is dropped on timeout and
/// cancellation so it cannot leak.
pub(crate) async fn wait_for_response(
    session: &Session,
    id: &duplexmcp_protocol::MessageId,
    rx: tokio::sync::oneshot::Receiver<JsonRpcResponse>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> TransportResult<JsonRpcResponse> {
    let pending = session.pending();
    tokio::select! {
        _ = cancel.cancelled() => {
            pending.remove(id);
            Err(TransportError::Cancelled("originating call cancelled".into()))
        }
        outcome = tokio::time::timeout(timeout, rx) => match outcome {
            Ok(Ok(response)) => Ok(response),
            // Waiter dropped by session teardown
            Ok(Err(_)) => Err(TransportError::Cancelled("session terminated".into())),
            Err(_) => {
                pending.remove(id);
                Err(TransportError::Timeout(timeout))
            }
        },
    }
}

impl std::fmt::Debug for ServerChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerChannel")
            .field("session_id", self.session.id())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStore;
    use duplexmcp_protocol::MessageId;
    use serde_json::json;

    fn test_session() -> Arc<Session> {
        SessionStore::new(Duration::from_secs(300), Duration::from_secs(60), 16).create()
    }

    #[tokio::test]
    async fn test_outbound_ids_monotonic() {
        let (stream, mut rx) = OutboundStream::channel();
        stream.send_json(&json!({"a": 1})).unwrap();
        stream.send_json(&json!({"b": 2})).unwrap();

        assert_eq!(rx.recv().await.unwrap().id, Some(1));
        assert_eq!(rx.recv().await.unwrap().id, Some(2));
    }

    #[tokio::test]
    async fn test_send_on_closed_stream_fails() {
        let (stream, rx) = OutboundStream::channel();
        drop(rx);
        assert!(matches!(
            stream.send_json(&json!({})),
            Err(TransportError::StreamClosed)
        ));
    }

    #[tokio::test]
    async fn test_request_resolves_on_reply() {
        let session = test_session();
        let (stream, mut rx) = OutboundStream::channel();
        let channel = ServerChannel::new(stream, Arc::clone(&session), Duration::from_secs(5));
        let cancel = CancellationToken::new();

        let session_for_reply = Arc::clone(&session);
        let reply = tokio::spawn(async move {
            // Read the framed request off the stream and answer it
            let frame = rx.recv().await.unwrap();
            let request: JsonRpcRequest = serde_json::from_str(&frame.data).unwrap();
            assert_eq!(request.id, MessageId::String("s-1".into()));
            assert_eq!(request.method, "sampling/createMessage");
            let response = JsonRpcResponse::success(json!({"model": "x"}), request.id);
            assert!(session_for_reply.pending().complete(response));
        });

        let response = channel
            .request("sampling/createMessage", Some(json!({"messages": []})), &cancel)
            .await
            .unwrap();
        assert!(response.is_success());
        reply.await.unwrap();
    }

    #[tokio::test]
    async fn test_request_cancelled_by_token() {
        let session = test_session();
        let (stream, _rx) = OutboundStream::channel();
        let channel = ServerChannel::new(stream, session, Duration::from_secs(30));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = channel.request("roots/list", None, &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_request_times_out() {
        let session = test_session();
        let (stream, _rx) = OutboundStream::channel();
        let channel = ServerChannel::new(stream, Arc::clone(&session), Duration::from_millis(20));
        let cancel = CancellationToken::new();

        let err = channel.request("ping", None, &cancel).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
        assert!(session.pending().is_empty());
    }

    #[tokio::test]
    async fn test_request_fails_when_session_tears_down() {
        let session = test_session();
        let (stream, _rx) = OutboundStream::channel();
        let channel = ServerChannel::new(stream, Arc::clone(&session), Duration::from_secs(30));
        let cancel = CancellationToken::new();

        let pending_session = Arc::clone(&session);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            pending_session.pending().cancel_all();
        });

        let err = channel.request("elicitation/create", None, &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
