//! Streamable HTTP server transport.
//!
//! One endpoint (default `/mcp`) serves three verbs:
//!
//! - `POST` carries JSON-RPC traffic. Notifications and correlated
//!   responses are acknowledged with `202 Accepted`; requests are answered
//!   with plain JSON or, when the client accepts `text/event-stream`, a
//!   transient POST-SSE stream that carries server-initiated traffic plus
//!   the final response.
//! - `GET` opens the session's long-lived notification stream, resumable
//!   via `Last-Event-ID`.
//! - `DELETE` terminates the session.
//!
//! Flushing is per-event: every frame is written as its own body chunk, so
//! clients observe events incrementally.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use duplexmcp_protocol::{
    codec, error_codes, methods, JsonRpcError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse,
    JsonRpcResponsePayload, JsonRpcVersion, ResponseId,
};

use crate::channel::{OutboundStream, ServerChannel};
use crate::config::StreamableConfig;
use crate::context::{McpService, RequestContext};
use crate::error::TransportResult;
use crate::headers;
use crate::session::{Session, SessionStore};
use crate::sse::SseEvent;

/// Streamable HTTP server bound to one service.
pub struct StreamableServer<S: McpService> {
    state: AppState<S>,
    shutdown: CancellationToken,
}

struct AppState<S: McpService> {
    service: Arc<S>,
    store: Arc<SessionStore>,
    config: Arc<StreamableConfig>,
}

impl<S: McpService> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S: McpService> StreamableServer<S> {
    /// Create a server from a configuration and service.
    pub fn new(config: StreamableConfig, service: Arc<S>) -> Self {
        let store = Arc::new(SessionStore::new(
            config.session_ttl,
            config.sweep_interval,
            config.replay_buffer_size,
        ));
        Self {
            state: AppState {
                service,
                store,
                config: Arc::new(config),
            },
            shutdown: CancellationToken::new(),
        }
    }

    /// The session store backing this server.
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.state.store
    }

    /// Token that stops the server when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Build the axum router (useful for tests and for mounting alongside
    /// other routes).
    pub fn into_router(self) -> Router {
        router(self.state)
    }

    /// Bind and serve until the shutdown token fires.
    pub async fn serve(self, addr: &str) -> TransportResult<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        self.serve_with_listener(listener).await
    }

    /// Serve on an existing listener until the shutdown token fires.
    pub async fn serve_with_listener(
        self,
        listener: tokio::net::TcpListener,
    ) -> TransportResult<()> {
        let sweeper = self.state.store.spawn_sweeper();
        let store = Arc::clone(&self.state.store);
        let shutdown = self.shutdown.clone();
        let endpoint = self.state.config.endpoint_path.clone();

        if let Ok(addr) = listener.local_addr() {
            info!(%addr, endpoint = %endpoint, "streamable HTTP transport listening");
        }

        let app = router(self.state);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        store.shutdown();
        sweeper.abort();
        Ok(())
    }
}

fn router<S: McpService>(state: AppState<S>) -> Router {
    let path = state.config.endpoint_path.clone();
    Router::new()
        .route(
            &path,
            post(post_handler::<S>)
                .get(get_handler::<S>)
                .delete(delete_handler::<S>),
        )
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// POST handler: decode, resolve the session, pick the response shape.
async fn post_handler<S: McpService>(
    State(state): State<AppState<S>>,
    req_headers: HeaderMap,
    body: Bytes,
) -> Response {
    let message = match codec::decode(&body) {
        Ok(message) => message,
        Err(e) => {
            debug!(error = %e, "rejecting malformed POST body");
            let response = JsonRpcResponse {
                jsonrpc: JsonRpcVersion,
                payload: JsonRpcResponsePayload::Error {
                    error: e.to_json_rpc_error(),
                },
                id: ResponseId::null(),
            };
            return (StatusCode::BAD_REQUEST, Json(response)).into_response();
        }
    };

    let session_header = req_headers
        .get(headers::MCP_SESSION_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    match message {
        JsonRpcMessage::Response(response) => {
            handle_client_response(&state, session_header.as_deref(), response)
        }
        JsonRpcMessage::Notification(notification) => {
            let session = match resolve_session(&state, session_header.as_deref()) {
                Ok(session) => session,
                Err(status) => return status.into_response(),
            };
            let ctx = context_for(&state, session.as_ref());
            state.service.handle_notification(notification, ctx).await;
            accepted(session.as_deref())
        }
        JsonRpcMessage::Request(request) => {
            handle_client_request(&state, session_header.as_deref(), &req_headers, request).await
        }
        JsonRpcMessage::Batch(items) => {
            handle_batch(&state, session_header.as_deref(), items).await
        }
    }
}

/// A POST body carrying a response: complete the matching waiter.
fn handle_client_response<S: McpService>(
    state: &AppState<S>,
    session_header: Option<&str>,
    response: JsonRpcResponse,
) -> Response {
    let session = match resolve_session(state, session_header) {
        Ok(session) => session,
        Err(status) => return status.into_response(),
    };
    if let Some(session) = &session {
        let claimed = session.pending().complete(response);
        debug!(session_id = %session.id(), claimed, "client response received");
    }
    accepted(session.as_deref())
}

/// A POST body carrying a request: dispatch and answer in the negotiated
/// shape.
async fn handle_client_request<S: McpService>(
    state: &AppState<S>,
    session_header: Option<&str>,
    req_headers: &HeaderMap,
    request: JsonRpcRequest,
) -> Response {
    // `initialize` is the one request that may create a session.
    let session = if request.method == methods::INITIALIZE
        && state.config.stateful
        && session_header.is_none()
    {
        Some(state.store.create())
    } else {
        match resolve_session(state, session_header) {
            Ok(session) => session,
            Err(status) => return status.into_response(),
        }
    };

    let accept = req_headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let wants_sse = state.config.enable_post_sse
        && accept.contains(headers::CONTENT_TYPE_SSE)
        && request.method != methods::INITIALIZE;

    if wants_sse {
        if let Some(session) = session.as_ref() {
            return streaming_response(state, Arc::clone(session), request);
        }
    }

    let ctx = context_for(state, session.as_ref());
    let request_id = request.id.clone();
    let response = match tokio::time::timeout(
        state.config.request_timeout,
        state.service.handle_request(request, ctx),
    )
    .await
    {
        Ok(response) => response,
        Err(_) => timeout_response(request_id),
    };

    (
        StatusCode::OK,
        session_header_map(session.as_deref()),
        Json(response),
    )
        .into_response()
}

/// Open a POST-SSE stream: the handler runs in its own task, intermediate
/// frames (notifications, server-initiated requests) flow first, and the
/// stream closes after the final response event.
fn streaming_response<S: McpService>(
    state: &AppState<S>,
    session: Arc<Session>,
    request: JsonRpcRequest,
) -> Response {
    let (stream, mut rx) = OutboundStream::channel();
    let cancel = session.cancel_token().child_token();
    let channel = ServerChannel::new(
        Arc::clone(&stream),
        Arc::clone(&session),
        state.config.server_request_timeout,
    );
    let ctx = RequestContext::for_session(Arc::clone(&session))
        .with_channel(channel)
        .with_cancel(cancel.clone());

    let service = Arc::clone(&state.service);
    let timeout = state.config.streaming_request_timeout;
    let request_id = request.id.clone();
    tokio::spawn(async move {
        let response = match tokio::time::timeout(timeout, service.handle_request(request, ctx))
            .await
        {
            Ok(response) => response,
            Err(_) => timeout_response(request_id),
        };
        match serde_json::to_value(&response) {
            Ok(frame) => {
                if stream.send_json(&frame).is_err() {
                    debug!("POST-SSE stream closed before the final response");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize final response"),
        }
        // All senders drop here; the stream ends after the final event.
    });

    // Cancel the handler's ctx when the client drops the connection.
    let guard = cancel.drop_guard();
    let body = async_stream::stream! {
        let _guard = guard;
        while let Some(frame) = rx.recv().await {
            yield Ok::<Event, Infallible>(to_event(frame));
        }
    };

    (
        StatusCode::OK,
        session_header_map(Some(session.as_ref())),
        Sse::new(body).keep_alive(keep_alive(state)),
    )
        .into_response()
}

/// Batch POST: per-item dispatch with id correlation preserved; always a
/// JSON response shape.
async fn handle_batch<S: McpService>(
    state: &AppState<S>,
    session_header: Option<&str>,
    items: Vec<JsonRpcMessage>,
) -> Response {
    let session = match resolve_session(state, session_header) {
        Ok(session) => session,
        Err(status) => return status.into_response(),
    };

    let mut responses = Vec::new();
    for item in items {
        match item {
            JsonRpcMessage::Request(request) => {
                let ctx = context_for(state, session.as_ref());
                let request_id = request.id.clone();
                let response = match tokio::time::timeout(
                    state.config.request_timeout,
                    state.service.handle_request(request, ctx),
                )
                .await
                {
                    Ok(response) => response,
                    Err(_) => timeout_response(request_id),
                };
                responses.push(response);
            }
            JsonRpcMessage::Notification(notification) => {
                let ctx = context_for(state, session.as_ref());
                state.service.handle_notification(notification, ctx).await;
            }
            JsonRpcMessage::Response(response) => {
                if let Some(session) = &session {
                    session.pending().complete(response);
                }
            }
            JsonRpcMessage::Batch(_) => {
                responses.push(JsonRpcResponse {
                    jsonrpc: JsonRpcVersion,
                    payload: JsonRpcResponsePayload::Error {
                        error: JsonRpcError::new(
                            error_codes::INVALID_REQUEST,
                            "nested batches are not allowed",
                        ),
                    },
                    id: ResponseId::null(),
                });
            }
        }
    }

    if responses.is_empty() {
        accepted(session.as_deref())
    } else {
        (
            StatusCode::OK,
            session_header_map(session.as_deref()),
            Json(responses),
        )
            .into_response()
    }
}

/// GET handler: open (or resume) the session's notification stream.
async fn get_handler<S: McpService>(
    State(state): State<AppState<S>>,
    req_headers: HeaderMap,
) -> Response {
    if !state.config.enable_get_sse || !state.config.stateful {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let accept = req_headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !accept.contains(headers::CONTENT_TYPE_SSE) {
        return StatusCode::NOT_ACCEPTABLE.into_response();
    }

    let Some(session_id) = req_headers
        .get(headers::MCP_SESSION_ID)
        .and_then(|v| v.to_str().ok())
    else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let Some(session) = state.store.get(session_id) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let last_event_id = req_headers
        .get(headers::LAST_EVENT_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let rx = match session.open_notification_stream(last_event_id) {
        Ok(rx) => rx,
        Err(e) => {
            // Resumption beyond the replay window: emit one error frame and
            // close so the client treats the stream state as lost.
            warn!(session_id = %session.id(), error = %e, "replay window exceeded");
            let detail = e.to_string();
            let body = async_stream::stream! {
                let data = serde_json::json!({"message": detail}).to_string();
                yield Ok::<Event, Infallible>(Event::default().event("error").data(data));
            };
            return (
                StatusCode::OK,
                session_header_map(Some(session.as_ref())),
                Sse::new(body),
            )
                .into_response();
        }
    };

    debug!(session_id = %session.id(), ?last_event_id, "notification stream attached");

    let mut rx = rx;
    let body = async_stream::stream! {
        while let Some(frame) = rx.recv().await {
            yield Ok::<Event, Infallible>(to_event(frame));
        }
    };

    (
        StatusCode::OK,
        session_header_map(Some(session.as_ref())),
        Sse::new(body).keep_alive(keep_alive(&state)),
    )
        .into_response()
}

/// DELETE handler: explicit session termination.
async fn delete_handler<S: McpService>(
    State(state): State<AppState<S>>,
    req_headers: HeaderMap,
) -> Response {
    let Some(session_id) = req_headers
        .get(headers::MCP_SESSION_ID)
        .and_then(|v| v.to_str().ok())
    else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    if state.store.terminate(session_id) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

/// Resolve the session for a protocol message.
///
/// In stateful mode a header must name a live session; an unknown id is
/// `404` and never creates a phantom session. Stateless mode carries no
/// session at all.
fn resolve_session<S: McpService>(
    state: &AppState<S>,
    session_header: Option<&str>,
) -> Result<Option<Arc<Session>>, StatusCode> {
    if !state.config.stateful {
        return Ok(None);
    }
    match session_header {
        Some(id) => state
            .store
            .get(id)
            .map(Some)
            .ok_or(StatusCode::NOT_FOUND),
        None => Err(StatusCode::BAD_REQUEST),
    }
}

fn context_for<S: McpService>(
    state: &AppState<S>,
    session: Option<&Arc<Session>>,
) -> RequestContext {
    let ctx = match session {
        Some(session) => RequestContext::for_session(Arc::clone(session)),
        None => RequestContext::detached(),
    };
    ctx.with_server_request_timeout(state.config.server_request_timeout)
}

fn accepted(session: Option<&Session>) -> Response {
    (StatusCode::ACCEPTED, session_header_map(session)).into_response()
}

fn session_header_map(session: Option<&Session>) -> HeaderMap {
    let mut headers_map = HeaderMap::new();
    if let Some(session) = session {
        if let Ok(value) = HeaderValue::from_str(session.id().as_str()) {
            headers_map.insert(headers::MCP_SESSION_ID, value);
        }
    }
    headers_map
}

fn keep_alive<S: McpService>(state: &AppState<S>) -> KeepAlive {
    KeepAlive::new()
        .interval(state.config.keep_alive)
        .text("keepalive")
}

fn timeout_response(id: duplexmcp_protocol::MessageId) -> JsonRpcResponse {
    JsonRpcResponse::error(
        JsonRpcError::new(error_codes::INTERNAL_ERROR, "request timed out"),
        id,
    )
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
