//! Streamable HTTP transport configuration.

use std::time::Duration;

/// Configuration for the streamable HTTP transport.
#[derive(Debug, Clone)]
pub struct StreamableConfig {
    /// MCP endpoint path
    pub endpoint_path: String,
    /// SSE keepalive interval
    pub keep_alive: Duration,
    /// Per-session replay buffer high-water mark
    pub replay_buffer_size: usize,
    /// Session idle TTL
    pub session_ttl: Duration,
    /// Background sweep cadence
    pub sweep_interval: Duration,
    /// Whether sessions are assigned and required (stateful mode)
    pub stateful: bool,
    /// Whether POST requests may negotiate an SSE response
    pub enable_post_sse: bool,
    /// Whether GET notification streams are served
    pub enable_get_sse: bool,
    /// Deadline for client-initiated calls answered with plain JSON
    pub request_timeout: Duration,
    /// Deadline for client-initiated calls answered over POST-SSE
    pub streaming_request_timeout: Duration,
    /// Deadline for server-initiated calls through the stream
    pub server_request_timeout: Duration,
}

impl Default for StreamableConfig {
    fn default() -> Self {
        StreamableConfigBuilder::new().build()
    }
}

impl StreamableConfig {
    /// Start building a configuration.
    pub fn builder() -> StreamableConfigBuilder {
        StreamableConfigBuilder::new()
    }
}

/// Builder for [`StreamableConfig`].
#[derive(Debug, Clone)]
pub struct StreamableConfigBuilder {
    endpoint_path: String,
    keep_alive: Duration,
    replay_buffer_size: usize,
    session_ttl: Duration,
    sweep_interval: Duration,
    stateful: bool,
    enable_post_sse: bool,
    enable_get_sse: bool,
    request_timeout: Duration,
    streaming_request_timeout: Duration,
    server_request_timeout: Duration,
}

impl Default for StreamableConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamableConfigBuilder {
    /// Create a builder with the canonical defaults.
    pub fn new() -> Self {
        Self {
            endpoint_path: "/mcp".to_string(),
            keep_alive: Duration::from_secs(30),
            replay_buffer_size: 1000,
            session_ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
            stateful: true,
            enable_post_sse: true,
            enable_get_sse: true,
            request_timeout: Duration::from_secs(30),
            streaming_request_timeout: Duration::from_secs(300),
            server_request_timeout: Duration::from_secs(120),
        }
    }

    /// Set the endpoint path (default `/mcp`).
    pub fn endpoint_path(mut self, path: impl Into<String>) -> Self {
        self.endpoint_path = path.into();
        self
    }

    /// Set the SSE keepalive interval (default 30 s).
    pub fn keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = interval;
        self
    }

    /// Set the replay buffer high-water mark (default 1000 events).
    pub fn replay_buffer_size(mut self, size: usize) -> Self {
        self.replay_buffer_size = size;
        self
    }

    /// Set the session idle TTL (default 300 s).
    pub fn session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Set the background sweep cadence (default 60 s).
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Toggle stateful mode (default on).
    pub fn stateful(mut self, stateful: bool) -> Self {
        self.stateful = stateful;
        self
    }

    /// Toggle SSE responses to POST (default on).
    pub fn enable_post_sse(mut self, enable: bool) -> Self {
        self.enable_post_sse = enable;
        self
    }

    /// Toggle GET notification streams (default on).
    pub fn enable_get_sse(mut self, enable: bool) -> Self {
        self.enable_get_sse = enable;
        self
    }

    /// Set the JSON response deadline (default 30 s).
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the POST-SSE response deadline (default 5 min).
    pub fn streaming_request_timeout(mut self, timeout: Duration) -> Self {
        self.streaming_request_timeout = timeout;
        self
    }

    /// Set the server-initiated call deadline (default 2 min).
    pub fn server_request_timeout(mut self, timeout: Duration) -> Self {
        self.server_request_timeout = timeout;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> StreamableConfig {
        StreamableConfig {
            endpoint_path: self.endpoint_path,
            keep_alive: self.keep_alive,
            replay_buffer_size: self.replay_buffer_size,
            session_ttl: self.session_ttl,
            sweep_interval: self.sweep_interval,
            stateful: self.stateful,
            enable_post_sse: self.enable_post_sse,
            enable_get_sse: self.enable_get_sse,
            request_timeout: self.request_timeout,
            streaming_request_timeout: self.streaming_request_timeout,
            server_request_timeout: self.server_request_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StreamableConfig::default();
        assert_eq!(config.endpoint_path, "/mcp");
        assert_eq!(config.keep_alive, Duration::from_secs(30));
        assert_eq!(config.replay_buffer_size, 1000);
        assert!(config.stateful);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.streaming_request_timeout, Duration::from_secs(300));
        assert_eq!(config.server_request_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_builder_overrides() {
        let config = StreamableConfig::builder()
            .endpoint_path("/rpc")
            .stateful(false)
            .session_ttl(Duration::from_secs(1))
            .build();
        assert_eq!(config.endpoint_path, "/rpc");
        assert!(!config.stateful);
        assert_eq!(config.session_ttl, Duration::from_secs(1));
    }
}
