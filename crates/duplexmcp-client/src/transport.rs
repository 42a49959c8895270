//! Streamable HTTP client transport.
//!
//! Wraps a `reqwest` client: POST with dual `Accept`, response-shape
//! dispatch on the `Content-Type` (202 / JSON / SSE), session header
//! capture and echo, GET notification streams with `Last-Event-ID`
//! resumption, and DELETE on close.

use std::collections::VecDeque;
use std::collections::HashMap;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::RwLock;
use reqwest::{header, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use duplexmcp_transport::{headers, SseEvent, SseParser};

use crate::error::{ClientError, ClientResult};

/// Reconnect policy for the notification stream.
#[derive(Clone, Debug)]
pub enum RetryPolicy {
    /// Fixed interval between attempts
    Fixed {
        /// Delay between attempts
        interval: Duration,
        /// Give up after this many attempts (`None` for unlimited)
        max_attempts: Option<u32>,
    },
    /// Exponential backoff with deterministic jitter
    Exponential {
        /// First delay
        base: Duration,
        /// Delay ceiling
        max_delay: Duration,
        /// Give up after this many attempts (`None` for unlimited)
        max_attempts: Option<u32>,
    },
    /// Never reconnect
    Never,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given attempt, or `None` to give up.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::Fixed {
                interval,
                max_attempts,
            } => {
                if max_attempts.is_some_and(|max| attempt >= max) {
                    return None;
                }
                Some(*interval)
            }
            Self::Exponential {
                base,
                max_delay,
                max_attempts,
            } => {
                if max_attempts.is_some_and(|max| attempt >= max) {
                    return None;
                }
                let exp = base.as_millis() as u64 * 2u64.saturating_pow(attempt.min(20));
                let capped = exp.min(max_delay.as_millis() as u64);
                // ±25% jitter derived from the attempt number; avoids a
                // rand dependency while still spreading reconnects
                let jitter_range = capped / 4;
                let offset = if jitter_range > 0 {
                    let hash = u64::from(attempt)
                        .wrapping_mul(6364136223846793005)
                        .wrapping_add(1442695040888963407);
                    hash % (jitter_range * 2)
                } else {
                    0
                };
                Some(Duration::from_millis(
                    capped.saturating_sub(jitter_range).saturating_add(offset),
                ))
            }
            Self::Never => None,
        }
    }
}

/// Client transport configuration.
#[derive(Clone, Debug)]
pub struct HttpClientConfig {
    /// Server base URL (e.g. `http://127.0.0.1:8080`)
    pub base_url: String,
    /// MCP endpoint path
    pub endpoint_path: String,
    /// Deadline for calls answered with plain JSON
    pub request_timeout: Duration,
    /// Deadline for calls answered over POST-SSE
    pub streaming_request_timeout: Duration,
    /// Notification stream reconnect policy
    pub retry: RetryPolicy,
    /// Extra headers on every request
    pub headers: HashMap<String, String>,
}

impl HttpClientConfig {
    /// Configuration for a base URL with canonical defaults.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            endpoint_path: "/mcp".to_string(),
            request_timeout: Duration::from_secs(30),
            streaming_request_timeout: Duration::from_secs(300),
            retry: RetryPolicy::default(),
            headers: HashMap::new(),
        }
    }
}

/// Outcome of a POST, by negotiated response shape.
pub enum PostOutcome {
    /// `202 Accepted`: notification or response delivered
    Accepted,
    /// Single JSON body
    Json(Value),
    /// One-shot SSE stream carrying events plus the final response
    Stream(EventStream),
}

/// The client side of the streamable HTTP transport.
pub struct HttpClientTransport {
    config: HttpClientConfig,
    http: reqwest::Client,
    session_id: RwLock<Option<String>>,
}

impl std::fmt::Debug for HttpClientTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClientTransport")
            .field("base_url", &self.config.base_url)
            .field("endpoint", &self.config.endpoint_path)
            .finish()
    }
}

impl HttpClientTransport {
    /// Create a transport.
    ///
    /// No whole-request timeout is set on the HTTP client: it would also
    /// bound long-lived SSE bodies. Deadlines are applied per call shape
    /// by the caller.
    pub fn new(config: HttpClientConfig) -> ClientResult<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            config,
            http,
            session_id: RwLock::new(None),
        })
    }

    /// Transport configuration.
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// The session id assigned by the server, once known.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    /// Forget the session (after DELETE or a 404).
    pub fn clear_session(&self) {
        *self.session_id.write() = None;
    }

    fn endpoint_url(&self) -> String {
        format!("{}{}", self.config.base_url, self.config.endpoint_path)
    }

    fn apply_common_headers(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(session) = self.session_id() {
            request = request.header(headers::MCP_SESSION_ID, session);
        }
        for (name, value) in &self.config.headers {
            request = request.header(name, value);
        }
        request
    }

    fn capture_session(&self, response: &reqwest::Response) {
        if let Some(session) = response
            .headers()
            .get(headers::MCP_SESSION_ID)
            .and_then(|v| v.to_str().ok())
        {
            let mut stored = self.session_id.write();
            if stored.as_deref() != Some(session) {
                debug!(session_id = %session, "session assigned");
                *stored = Some(session.to_string());
            }
        }
    }

    /// POST a JSON-RPC message and classify the response shape.
    pub async fn post(&self, message: &Value) -> ClientResult<PostOutcome> {
        let request = self
            .apply_common_headers(self.http.post(self.endpoint_url()))
            .header(
                header::ACCEPT,
                "application/json, text/event-stream",
            )
            .header(header::CONTENT_TYPE, headers::CONTENT_TYPE_JSON)
            .json(message);

        let response = request.send().await?;
        self.capture_session(&response);

        match response.status() {
            StatusCode::ACCEPTED => Ok(PostOutcome::Accepted),
            StatusCode::NOT_FOUND => {
                self.clear_session();
                Err(ClientError::SessionNotFound)
            }
            status if status.is_success() => {
                let content_type = response
                    .headers()
                    .get(header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("");
                if content_type.starts_with(headers::CONTENT_TYPE_SSE) {
                    Ok(PostOutcome::Stream(EventStream::new(response)))
                } else {
                    Ok(PostOutcome::Json(response.json().await?))
                }
            }
            status => {
                warn!(%status, "unexpected POST status");
                Err(ClientError::UnexpectedStatus(status))
            }
        }
    }

    /// Open the long-lived notification stream, resuming after
    /// `last_event_id` when set.
    pub async fn open_notification_stream(
        &self,
        last_event_id: Option<u64>,
    ) -> ClientResult<EventStream> {
        let mut request = self
            .apply_common_headers(self.http.get(self.endpoint_url()))
            .header(header::ACCEPT, headers::CONTENT_TYPE_SSE);
        if let Some(last) = last_event_id {
            request = request.header(headers::LAST_EVENT_ID, last.to_string());
        }

        let response = request.send().await?;
        self.capture_session(&response);

        match response.status() {
            StatusCode::NOT_FOUND => {
                self.clear_session();
                Err(ClientError::SessionNotFound)
            }
            status if status.is_success() => Ok(EventStream::new(response)),
            status => Err(ClientError::UnexpectedStatus(status)),
        }
    }

    /// Terminate the session server-side.
    pub async fn delete_session(&self) -> ClientResult<()> {
        let Some(_session) = self.session_id() else {
            return Ok(());
        };
        let response = self
            .apply_common_headers(self.http.delete(self.endpoint_url()))
            .send()
            .await?;
        self.clear_session();
        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(()),
            status => Err(ClientError::UnexpectedStatus(status)),
        }
    }
}

/// An SSE response body, decoded incrementally into events.
pub struct EventStream {
    chunks: BoxStream<'static, reqwest::Result<bytes::Bytes>>,
    parser: SseParser,
    ready: VecDeque<SseEvent>,
}

impl EventStream {
    fn new(response: reqwest::Response) -> Self {
        Self {
            chunks: response.bytes_stream().boxed(),
            parser: SseParser::new(),
            ready: VecDeque::new(),
        }
    }

    /// Next event, or `None` when the stream ends.
    pub async fn next_event(&mut self) -> ClientResult<Option<SseEvent>> {
        loop {
            if let Some(event) = self.ready.pop_front() {
                return Ok(Some(event));
            }
            match self.chunks.next().await {
                Some(Ok(chunk)) => self.ready.extend(self.parser.feed(&chunk)),
                Some(Err(e)) => return Err(ClientError::Http(e)),
                None => return Ok(None),
            }
        }
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("buffered", &self.ready.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_fixed_gives_up() {
        let policy = RetryPolicy::Fixed {
            interval: Duration::from_secs(5),
            max_attempts: Some(2),
        };
        assert_eq!(policy.delay(0), Some(Duration::from_secs(5)));
        assert_eq!(policy.delay(1), Some(Duration::from_secs(5)));
        assert_eq!(policy.delay(2), None);
    }

    #[test]
    fn test_retry_exponential_with_jitter_bounds() {
        let policy = RetryPolicy::default();
        // Base 1s: jittered into [750ms, 1250ms]
        let first = policy.delay(0).unwrap();
        assert!(first >= Duration::from_millis(750) && first <= Duration::from_millis(1250));
        // Far attempts are capped at 30s ± 25%
        let late = policy.delay(12).unwrap();
        assert!(late >= Duration::from_millis(22_500) && late <= Duration::from_millis(37_500));
    }

    #[test]
    fn test_retry_never() {
        assert_eq!(RetryPolicy::Never.delay(0), None);
    }

    #[test]
    fn test_config_defaults() {
        let config = HttpClientConfig::new("http://localhost:8080");
        assert_eq!(config.endpoint_path, "/mcp");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.streaming_request_timeout, Duration::from_secs(300));
    }
}
