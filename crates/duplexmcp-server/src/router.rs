//! Request routing.
//!
//! Maps decoded JSON-RPC traffic onto registered handlers, enforces the
//! session state machine (`initialize` first, nothing after termination),
//! runs the middleware chain around every dispatch, and converts errors to
//! wire error objects. Implements the transport-facing [`McpService`]
//! contract, so one router serves every wire shape.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use duplexmcp_protocol::types::{
    CallToolRequest, CancelledNotification, CompleteRequest, CompleteResult, EmptyResult,
    GetPromptRequest, Implementation, InitializeRequest, InitializeResult,
    ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult, ListToolsResult,
    PromptsCapability, ReadResourceRequest, ResourcesCapability, ServerCapabilities,
    SetLevelRequest, ToolsCapability,
};
use duplexmcp_protocol::{
    methods, version, Error, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, MessageId,
};
use duplexmcp_transport::{McpService, RequestContext, SessionState};

use crate::context::ServerCtx;
use crate::error::{ServerError, ServerResult};
use crate::middleware::{Endpoint, Middleware, Next};
use crate::registry::{CompletionKey, HandlerRegistry};

/// Hook invoked when the client announces a roots change.
pub type RootsChangedHook = Arc<dyn Fn() + Send + Sync>;

/// The request router.
pub struct RequestRouter {
    endpoint: Arc<RouterEndpoint>,
    middlewares: Arc<[Arc<dyn Middleware>]>,
    in_flight: DashMap<(String, MessageId), CancellationToken>,
    roots_changed: Option<RootsChangedHook>,
}

/// Method dispatch: the inner end of every middleware chain.
struct RouterEndpoint {
    registry: Arc<HandlerRegistry>,
    info: Implementation,
    instructions: Option<String>,
}

impl RequestRouter {
    /// Create a router over a registry.
    pub fn new(
        registry: Arc<HandlerRegistry>,
        info: Implementation,
        instructions: Option<String>,
        middlewares: Vec<Arc<dyn Middleware>>,
        roots_changed: Option<RootsChangedHook>,
    ) -> Self {
        Self {
            endpoint: Arc::new(RouterEndpoint {
                registry,
                info,
                instructions,
            }),
            middlewares: Arc::from(middlewares),
            in_flight: DashMap::new(),
            roots_changed,
        }
    }

    /// The capabilities this server advertises, derived from what is
    /// registered.
    pub fn capabilities(&self) -> ServerCapabilities {
        self.endpoint.capabilities()
    }

    fn flight_key(ctx: &RequestContext, id: &MessageId) -> (String, MessageId) {
        let session = ctx
            .session()
            .map(|s| s.id().as_str().to_string())
            .unwrap_or_default();
        (session, id.clone())
    }

    /// Enforce the session lifecycle before dispatch.
    fn check_state(ctx: &RequestContext, method: &str) -> Result<(), Error> {
        let Some(session) = ctx.session() else {
            return Ok(());
        };
        match session.state() {
            SessionState::Terminated => Err(Error::SessionTerminated),
            SessionState::New if method != methods::INITIALIZE => Err(Error::NotInitialized),
            // A second initialize on a live session is rejected below in
            // the handler itself, where the first one is observable.
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl McpService for RequestRouter {
    async fn handle_request(
        &self,
        request: JsonRpcRequest,
        ctx: RequestContext,
    ) -> JsonRpcResponse {
        let id = request.id.clone();

        if let Err(e) = Self::check_state(&ctx, &request.method) {
            return JsonRpcResponse::error(e.to_json_rpc_error(), id);
        }

        // Track the request so `notifications/cancelled` can reach it.
        let key = Self::flight_key(&ctx, &id);
        self.in_flight.insert(key.clone(), ctx.cancel_token().clone());

        let endpoint: Arc<dyn Endpoint> = Arc::clone(&self.endpoint) as Arc<dyn Endpoint>;
        let next = Next::new(Arc::clone(&self.middlewares), endpoint);
        let result = next.run(request, ServerCtx::new(ctx)).await;

        self.in_flight.remove(&key);

        match result {
            Ok(value) => JsonRpcResponse::success(value, id),
            Err(e) => {
                if e.is_cancelled() {
                    debug!(%id, "request cancelled before completion");
                }
                JsonRpcResponse::error(e.to_json_rpc_error(), id)
            }
        }
    }

    async fn handle_notification(&self, notification: JsonRpcNotification, ctx: RequestContext) {
        match notification.method.as_str() {
            methods::NOTIFICATION_INITIALIZED => {
                if let Some(session) = ctx.session() {
                    if session.mark_initialized() {
                        debug!(session_id = %session.id(), "handshake complete");
                    } else {
                        warn!(session_id = %session.id(), "unexpected notifications/initialized");
                    }
                }
            }
            methods::NOTIFICATION_CANCELLED => {
                let Ok(cancelled) = notification.params_as::<CancelledNotification>() else {
                    debug!("malformed notifications/cancelled, dropping");
                    return;
                };
                let key = Self::flight_key(&ctx, &cancelled.request_id);
                match self.in_flight.get(&key) {
                    Some(token) => {
                        debug!(id = %cancelled.request_id, reason = ?cancelled.reason, "cancelling request");
                        token.cancel();
                    }
                    // Unknown or already-finished id: silently dropped
                    None => debug!(id = %cancelled.request_id, "cancellation for unknown request"),
                }
            }
            methods::NOTIFICATION_ROOTS_LIST_CHANGED => {
                debug!("client roots changed");
                if let Some(hook) = &self.roots_changed {
                    hook();
                }
            }
            methods::NOTIFICATION_MESSAGE => {
                debug!(params = ?notification.params, "client log message");
            }
            other => debug!(method = other, "ignoring unknown notification"),
        }
    }
}

impl RouterEndpoint {
    fn capabilities(&self) -> ServerCapabilities {
        ServerCapabilities {
            tools: self.registry.has_tools().then(ToolsCapability::default),
            prompts: self.registry.has_prompts().then(PromptsCapability::default),
            resources: self
                .registry
                .has_resources()
                .then(ResourcesCapability::default),
            logging: Some(Value::Object(Default::default())),
            completions: self
                .registry
                .has_completions()
                .then(|| Value::Object(Default::default())),
            experimental: None,
        }
    }

    async fn initialize(&self, request: &JsonRpcRequest, ctx: &ServerCtx) -> ServerResult<Value> {
        let params: InitializeRequest = request
            .params_as()
            .map_err(|e| Error::invalid_params(e.to_string()))?;

        let negotiated = version::negotiate(&params.protocol_version);

        if let Some(session) = ctx.session() {
            // A session only initializes once.
            if session.protocol_version().is_some() {
                return Err(ServerError::Protocol(Error::invalid_request(
                    "session already initialized",
                )));
            }
            session.set_protocol_version(negotiated);
            session.set_client_capabilities(params.capabilities.clone());
            debug!(
                session_id = %session.id(),
                client = %params.client_info.name,
                protocol = negotiated,
                "initialize"
            );
        }

        let result = InitializeResult {
            protocol_version: negotiated.to_string(),
            capabilities: self.capabilities(),
            server_info: self.info.clone(),
            instructions: self.instructions.clone(),
        };
        Ok(serde_json::to_value(result)?)
    }

    async fn call_tool(&self, request: &JsonRpcRequest, ctx: ServerCtx) -> ServerResult<Value> {
        let params: CallToolRequest = request
            .params_as()
            .map_err(|e| Error::invalid_params(e.to_string()))?;
        let tool = self
            .registry
            .tool(&params.name)
            .ok_or_else(|| Error::invalid_params(format!("unknown tool: {}", params.name)))?;
        let result = tool.handler.call(params.arguments, ctx).await?;
        Ok(serde_json::to_value(result)?)
    }

    async fn get_prompt(&self, request: &JsonRpcRequest, ctx: ServerCtx) -> ServerResult<Value> {
        let params: GetPromptRequest = request
            .params_as()
            .map_err(|e| Error::invalid_params(e.to_string()))?;
        let prompt = self
            .registry
            .prompt(&params.name)
            .ok_or_else(|| Error::invalid_params(format!("unknown prompt: {}", params.name)))?;
        let result = prompt.handler.get(params.arguments, ctx).await?;
        Ok(serde_json::to_value(result)?)
    }

    async fn read_resource(&self, request: &JsonRpcRequest, ctx: ServerCtx) -> ServerResult<Value> {
        let params: ReadResourceRequest = request
            .params_as()
            .map_err(|e| Error::invalid_params(e.to_string()))?;
        let resolved = self
            .registry
            .resolve_resource(&params.uri)
            .ok_or_else(|| Error::invalid_params(format!("unknown resource: {}", params.uri)))?;
        let result = resolved
            .handler
            .read(&params.uri, resolved.template_values, ctx)
            .await?;
        Ok(serde_json::to_value(result)?)
    }

    async fn complete(&self, request: &JsonRpcRequest, ctx: ServerCtx) -> ServerResult<Value> {
        let params: CompleteRequest = request
            .params_as()
            .map_err(|e| Error::invalid_params(e.to_string()))?;
        let key = CompletionKey::from_reference(&params.reference, &params.argument.name);
        let completion = match self.registry.completion(&key) {
            Some(provider) => provider.complete(params.argument, ctx).await?,
            // No provider registered: an empty candidate list
            None => Default::default(),
        };
        Ok(serde_json::to_value(CompleteResult { completion })?)
    }

    async fn set_level(&self, request: &JsonRpcRequest, ctx: &ServerCtx) -> ServerResult<Value> {
        let params: SetLevelRequest = request
            .params_as()
            .map_err(|e| Error::invalid_params(e.to_string()))?;
        if let Some(session) = ctx.session() {
            session.set_min_log_level(params.level);
        }
        Ok(serde_json::to_value(EmptyResult::default())?)
    }
}

#[async_trait]
impl Endpoint for RouterEndpoint {
    async fn dispatch(&self, request: JsonRpcRequest, ctx: ServerCtx) -> ServerResult<Value> {
        match request.method.as_str() {
            methods::INITIALIZE => self.initialize(&request, &ctx).await,
            methods::PING => Ok(serde_json::to_value(EmptyResult::default())?),

            methods::TOOLS_LIST => Ok(serde_json::to_value(ListToolsResult {
                tools: self.registry.list_tools(),
                next_cursor: None,
            })?),
            methods::TOOLS_CALL => self.call_tool(&request, ctx).await,

            methods::PROMPTS_LIST => Ok(serde_json::to_value(ListPromptsResult {
                prompts: self.registry.list_prompts(),
                next_cursor: None,
            })?),
            methods::PROMPTS_GET => self.get_prompt(&request, ctx).await,

            methods::RESOURCES_LIST => Ok(serde_json::to_value(ListResourcesResult {
                resources: self.registry.list_resources(),
                next_cursor: None,
            })?),
            methods::RESOURCES_TEMPLATES_LIST => {
                Ok(serde_json::to_value(ListResourceTemplatesResult {
                    resource_templates: self.registry.list_templates(),
                    next_cursor: None,
                })?)
            }
            methods::RESOURCES_READ => self.read_resource(&request, ctx).await,

            methods::COMPLETION_COMPLETE => self.complete(&request, ctx).await,
            methods::LOGGING_SET_LEVEL => self.set_level(&request, &ctx).await,

            other => Err(ServerError::Protocol(Error::method_not_found(other))),
        }
    }
}

impl std::fmt::Debug for RequestRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestRouter")
            .field("middlewares", &self.middlewares.len())
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}
