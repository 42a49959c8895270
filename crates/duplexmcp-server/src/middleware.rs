//! Middleware chain.
//!
//! A middleware wraps dispatch onion-style: it sees the decoded request and
//! the typed context, may short-circuit, and calls `next.run(..)` to
//! continue. Middlewares run in registration order on the inbound path.
//! Raw wire bytes are never visible here.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, error, warn};

use duplexmcp_protocol::JsonRpcRequest;

use crate::context::ServerCtx;
use crate::error::{ServerError, ServerResult};

/// A dispatch middleware.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Process `request`, calling `next.run(request, ctx)` to continue the
    /// chain. The returned value is the JSON-RPC result payload.
    async fn handle(
        &self,
        request: JsonRpcRequest,
        ctx: ServerCtx,
        next: Next,
    ) -> ServerResult<Value>;
}

/// The inner end of the chain: the router's method dispatch.
#[async_trait]
pub(crate) trait Endpoint: Send + Sync {
    async fn dispatch(&self, request: JsonRpcRequest, ctx: ServerCtx) -> ServerResult<Value>;
}

/// Continuation to the next middleware (or the endpoint).
pub struct Next {
    chain: Arc<[Arc<dyn Middleware>]>,
    endpoint: Arc<dyn Endpoint>,
    index: usize,
}

impl std::fmt::Debug for Next {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &(self.chain.len() - self.index))
            .finish()
    }
}

impl Next {
    pub(crate) fn new(chain: Arc<[Arc<dyn Middleware>]>, endpoint: Arc<dyn Endpoint>) -> Self {
        Self {
            chain,
            endpoint,
            index: 0,
        }
    }

    /// Run the remainder of the chain.
    pub async fn run(mut self, request: JsonRpcRequest, ctx: ServerCtx) -> ServerResult<Value> {
        if self.index < self.chain.len() {
            let middleware = Arc::clone(&self.chain[self.index]);
            self.index += 1;
            middleware.handle(request, ctx, self).await
        } else {
            self.endpoint.dispatch(request, ctx).await
        }
    }
}

/// Converts handler panics into internal errors.
///
/// Installed at the outer edge of every chain so a single bad handler
/// cannot take the process (and every session) down with it.
#[derive(Debug, Default)]
pub struct RecoveryMiddleware;

#[async_trait]
impl Middleware for RecoveryMiddleware {
    async fn handle(
        &self,
        request: JsonRpcRequest,
        ctx: ServerCtx,
        next: Next,
    ) -> ServerResult<Value> {
        let method = request.method.clone();
        match AssertUnwindSafe(next.run(request, ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(method = %method, panic = %detail, "handler panicked");
                Err(ServerError::internal("handler panicked"))
            }
        }
    }
}

/// Bounds dispatch with a deadline.
#[derive(Debug)]
pub struct TimeoutMiddleware {
    timeout: Duration,
}

impl TimeoutMiddleware {
    /// Create a timeout middleware.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Middleware for TimeoutMiddleware {
    async fn handle(
        &self,
        request: JsonRpcRequest,
        ctx: ServerCtx,
        next: Next,
    ) -> ServerResult<Value> {
        let method = request.method.clone();
        match tokio::time::timeout(self.timeout, next.run(request, ctx)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(method = %method, timeout = ?self.timeout, "dispatch deadline elapsed");
                Err(ServerError::internal(format!(
                    "'{method}' timed out after {:?}",
                    self.timeout
                )))
            }
        }
    }
}

/// Logs each dispatch with its outcome and latency.
#[derive(Debug, Default)]
pub struct TracingMiddleware;

#[async_trait]
impl Middleware for TracingMiddleware {
    async fn handle(
        &self,
        request: JsonRpcRequest,
        ctx: ServerCtx,
        next: Next,
    ) -> ServerResult<Value> {
        let method = request.method.clone();
        let id = request.id.clone();
        let started = Instant::now();
        let result = next.run(request, ctx).await;
        let elapsed = started.elapsed();
        match &result {
            Ok(_) => debug!(method = %method, %id, ?elapsed, "request handled"),
            Err(e) => debug!(method = %method, %id, ?elapsed, error = %e, "request failed"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duplexmcp_protocol::MessageId;
    use duplexmcp_transport::RequestContext;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct OkEndpoint;

    #[async_trait]
    impl Endpoint for OkEndpoint {
        async fn dispatch(&self, _request: JsonRpcRequest, _ctx: ServerCtx) -> ServerResult<Value> {
            Ok(json!({"ok": true}))
        }
    }

    struct PanickingEndpoint;

    #[async_trait]
    impl Endpoint for PanickingEndpoint {
        async fn dispatch(&self, _request: JsonRpcRequest, _ctx: ServerCtx) -> ServerResult<Value> {
            panic!("boom");
        }
    }

    struct SlowEndpoint;

    #[async_trait]
    impl Endpoint for SlowEndpoint {
        async fn dispatch(&self, _request: JsonRpcRequest, _ctx: ServerCtx) -> ServerResult<Value> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Value::Null)
        }
    }

    /// Appends its tag on the way in, proving registration order.
    struct TagMiddleware {
        tag: &'static str,
        seen: Arc<parking_lot::Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Middleware for TagMiddleware {
        async fn handle(
            &self,
            request: JsonRpcRequest,
            ctx: ServerCtx,
            next: Next,
        ) -> ServerResult<Value> {
            self.seen.lock().push(self.tag);
            next.run(request, ctx).await
        }
    }

    struct CountingMiddleware {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Middleware for CountingMiddleware {
        async fn handle(
            &self,
            request: JsonRpcRequest,
            ctx: ServerCtx,
            next: Next,
        ) -> ServerResult<Value> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            next.run(request, ctx).await
        }
    }

    fn request() -> JsonRpcRequest {
        JsonRpcRequest::new("ping", None, MessageId::Number(1))
    }

    fn ctx() -> ServerCtx {
        ServerCtx::new(RequestContext::detached())
    }

    fn chain(middlewares: Vec<Arc<dyn Middleware>>, endpoint: Arc<dyn Endpoint>) -> Next {
        Next::new(Arc::from(middlewares), endpoint)
    }

    #[tokio::test]
    async fn test_middlewares_run_in_registration_order() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let middlewares: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(TagMiddleware {
                tag: "first",
                seen: Arc::clone(&seen),
            }),
            Arc::new(TagMiddleware {
                tag: "second",
                seen: Arc::clone(&seen),
            }),
        ];
        let result = chain(middlewares, Arc::new(OkEndpoint))
            .run(request(), ctx())
            .await
            .unwrap();
        assert_eq!(result, json!({"ok": true}));
        assert_eq!(seen.lock().as_slice(), ["first", "second"]);
    }

    #[tokio::test]
    async fn test_every_middleware_sees_the_request() {
        let calls = Arc::new(AtomicUsize::new(0));
        let middlewares: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(CountingMiddleware {
                calls: Arc::clone(&calls),
            }),
            Arc::new(CountingMiddleware {
                calls: Arc::clone(&calls),
            }),
            Arc::new(CountingMiddleware {
                calls: Arc::clone(&calls),
            }),
        ];
        chain(middlewares, Arc::new(OkEndpoint))
            .run(request(), ctx())
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_recovery_converts_panics() {
        let middlewares: Vec<Arc<dyn Middleware>> = vec![Arc::new(RecoveryMiddleware)];
        let err = chain(middlewares, Arc::new(PanickingEndpoint))
            .run(request(), ctx())
            .await
            .unwrap_err();
        assert_eq!(err.to_json_rpc_error().code, -32603);
    }

    #[tokio::test]
    async fn test_timeout_middleware() {
        let middlewares: Vec<Arc<dyn Middleware>> =
            vec![Arc::new(TimeoutMiddleware::new(Duration::from_millis(20)))];
        let run = chain(middlewares, Arc::new(SlowEndpoint)).run(request(), ctx());
        let err = run.await.unwrap_err();
        assert_eq!(err.to_json_rpc_error().code, -32603);
    }
}
