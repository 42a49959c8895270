//! Legacy SSE transport (protocol revision 2024-11-05).
//!
//! Older clients speak a two-path scheme: `GET /sse` opens the stream and
//! the first event is an `endpoint` event naming the message path; all
//! client traffic then flows through `POST /message?sessionId=…` and every
//! server message (responses included) rides the SSE stream. The session
//! and dispatch layers are shared with the streamable transport.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, warn};

use duplexmcp_protocol::{codec, JsonRpcMessage};

use crate::context::{McpService, RequestContext};
use crate::session::SessionStore;
use crate::sse::SseEvent;

/// Configuration for the legacy transport.
#[derive(Debug, Clone)]
pub struct LegacyConfig {
    /// Path of the stream-opening GET endpoint
    pub sse_path: String,
    /// Path of the message POST endpoint
    pub message_path: String,
    /// SSE keepalive interval
    pub keep_alive: Duration,
    /// Deadline for server-initiated calls
    pub server_request_timeout: Duration,
}

impl Default for LegacyConfig {
    fn default() -> Self {
        Self {
            sse_path: "/sse".to_string(),
            message_path: "/message".to_string(),
            keep_alive: Duration::from_secs(30),
            server_request_timeout: Duration::from_secs(120),
        }
    }
}

struct LegacyState<S: McpService> {
    service: Arc<S>,
    store: Arc<SessionStore>,
    config: Arc<LegacyConfig>,
}

impl<S: McpService> Clone for LegacyState<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// Build the legacy router over a shared session store and service.
pub fn legacy_router<S: McpService>(
    config: LegacyConfig,
    store: Arc<SessionStore>,
    service: Arc<S>,
) -> Router {
    let state = LegacyState {
        service,
        store,
        config: Arc::new(config),
    };
    let sse_path = state.config.sse_path.clone();
    let message_path = state.config.message_path.clone();
    Router::new()
        .route(&sse_path, get(sse_handler::<S>))
        .route(&message_path, post(message_handler::<S>))
        .with_state(state)
}

/// GET handler: create a session and open its stream. The first event is
/// the `endpoint` bootstrap required by 2024-11-05 clients.
async fn sse_handler<S: McpService>(State(state): State<LegacyState<S>>) -> Response {
    let session = state.store.create();
    let rx = match session.open_notification_stream(None) {
        Ok(rx) => rx,
        Err(e) => {
            warn!(error = %e, "failed to open legacy stream");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let endpoint = format!(
        "{}?sessionId={}",
        state.config.message_path,
        session.id()
    );
    debug!(session_id = %session.id(), "legacy SSE stream opened");

    let mut rx = rx;
    let body = async_stream::stream! {
        yield Ok::<Event, Infallible>(Event::default().event("endpoint").data(endpoint));
        while let Some(frame) = rx.recv().await {
            yield Ok(to_event(frame));
        }
    };

    Sse::new(body)
        .keep_alive(KeepAlive::new().interval(state.config.keep_alive).text("keepalive"))
        .into_response()
}

/// POST handler: all client→server traffic. Responses to the client go
/// back over the SSE stream; the POST itself is acknowledged with `202`.
async fn message_handler<S: McpService>(
    State(state): State<LegacyState<S>>,
    Query(query): Query<MessageQuery>,
    body: Bytes,
) -> Response {
    let Some(session_id) = query.session_id else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let Some(session) = state.store.get(&session_id) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let message = match codec::decode(&body) {
        Ok(message) => message,
        Err(e) => {
            debug!(error = %e, "rejecting malformed legacy message");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    match message {
        JsonRpcMessage::Request(request) => {
            let ctx = RequestContext::for_session(Arc::clone(&session))
                .with_server_request_timeout(state.config.server_request_timeout);
            let service = Arc::clone(&state.service);
            let response_session = Arc::clone(&session);
            // The response is pushed onto the stream, not the POST reply.
            tokio::spawn(async move {
                let response = service.handle_request(request, ctx).await;
                match serde_json::to_string(&response) {
                    Ok(frame) => {
                        response_session.push_notification(frame);
                    }
                    Err(e) => warn!(error = %e, "failed to serialize legacy response"),
                }
            });
            StatusCode::ACCEPTED.into_response()
        }
        JsonRpcMessage::Notification(notification) => {
            let ctx = RequestContext::for_session(Arc::clone(&session))
                .with_server_request_timeout(state.config.server_request_timeout);
            state.service.handle_notification(notification, ctx).await;
            StatusCode::ACCEPTED.into_response()
        }
        JsonRpcMessage::Response(response) => {
            session.pending().complete(response);
            StatusCode::ACCEPTED.into_response()
        }
        JsonRpcMessage::Batch(_) => StatusCode::BAD_REQUEST.into_response(),
    }
}

fn to_event(frame: SseEvent) -> Event {
    let mut event = Event::default().data(frame.data);
    if let Some(id) = frame.id {
        event = event.id(id.to_string());
    }
    if let Some(kind) = frame.event {
        event = event.event(kind);
    }
    event
}
