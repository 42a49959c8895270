//! Server assembly.
//!
//! [`McpServerBuilder`] collects descriptors, handlers, and middlewares
//! and produces an [`McpServer`] wired to the streamable HTTP transport.

use std::sync::Arc;

use tracing::info;

use duplexmcp_protocol::types::{Implementation, Prompt, Resource, ResourceTemplate, Tool};
use duplexmcp_transport::{
    legacy_router, LegacyConfig, StreamableConfig, StreamableServer, TransportResult,
};

use crate::handlers::{CompletionProvider, PromptHandler, ResourceHandler, ToolHandler};
use crate::middleware::{Middleware, RecoveryMiddleware};
use crate::registry::{CompletionKey, CompletionRefKind, HandlerRegistry};
use crate::router::{RequestRouter, RootsChangedHook};

/// Builder for an MCP server.
pub struct McpServerBuilder {
    info: Implementation,
    instructions: Option<String>,
    registry: Arc<HandlerRegistry>,
    middlewares: Vec<Arc<dyn Middleware>>,
    config: StreamableConfig,
    recovery: bool,
    roots_changed: Option<RootsChangedHook>,
}

impl McpServerBuilder {
    /// Start building a server with the given implementation info.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            info: Implementation::new(name, version),
            instructions: None,
            registry: Arc::new(HandlerRegistry::new()),
            middlewares: Vec::new(),
            config: StreamableConfig::default(),
            recovery: true,
            roots_changed: None,
        }
    }

    /// Set the instructions surfaced to clients at `initialize`.
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Set the transport configuration.
    pub fn config(mut self, config: StreamableConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a tool.
    pub fn tool(self, descriptor: Tool, handler: impl ToolHandler) -> Self {
        self.registry.register_tool(descriptor, Arc::new(handler));
        self
    }

    /// Register a prompt.
    pub fn prompt(self, descriptor: Prompt, handler: impl PromptHandler) -> Self {
        self.registry.register_prompt(descriptor, Arc::new(handler));
        self
    }

    /// Register an exact-URI resource.
    pub fn resource(self, descriptor: Resource, handler: impl ResourceHandler) -> Self {
        self.registry.register_resource(descriptor, Arc::new(handler));
        self
    }

    /// Register a resource template. Templates match after exact URIs, in
    /// registration order.
    pub fn resource_template(
        self,
        descriptor: ResourceTemplate,
        handler: impl ResourceHandler,
    ) -> Self {
        self.registry.register_template(descriptor, Arc::new(handler));
        self
    }

    /// Register a completion provider for a prompt argument.
    pub fn prompt_completion(
        self,
        prompt: impl Into<String>,
        argument: impl Into<String>,
        provider: impl CompletionProvider,
    ) -> Self {
        self.registry.register_completion(
            CompletionKey {
                reference: CompletionRefKind::Prompt,
                target: prompt.into(),
                argument: argument.into(),
            },
            Arc::new(provider),
        );
        self
    }

    /// Register a completion provider for a resource template variable.
    pub fn resource_completion(
        self,
        uri_template: impl Into<String>,
        argument: impl Into<String>,
        provider: impl CompletionProvider,
    ) -> Self {
        self.registry.register_completion(
            CompletionKey {
                reference: CompletionRefKind::Resource,
                target: uri_template.into(),
                argument: argument.into(),
            },
            Arc::new(provider),
        );
        self
    }

    /// Append a middleware. Middlewares run in registration order.
    pub fn middleware(mut self, middleware: impl Middleware) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Disable the outer recovery middleware (tests only; without it a
    /// panicking handler takes down its connection task).
    pub fn without_recovery(mut self) -> Self {
        self.recovery = false;
        self
    }

    /// Install a hook for `notifications/roots/list_changed`.
    pub fn on_roots_changed(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.roots_changed = Some(Arc::new(hook));
        self
    }

    /// Build the server.
    pub fn build(self) -> McpServer {
        let mut chain: Vec<Arc<dyn Middleware>> = Vec::new();
        if self.recovery {
            // Outer edge of the onion: panics become -32603
            chain.push(Arc::new(RecoveryMiddleware));
        }
        chain.extend(self.middlewares);

        let router = Arc::new(RequestRouter::new(
            self.registry,
            self.info.clone(),
            self.instructions,
            chain,
            self.roots_changed,
        ));

        McpServer {
            info: self.info,
            router,
            config: self.config,
        }
    }
}

/// A fully assembled MCP server.
pub struct McpServer {
    info: Implementation,
    router: Arc<RequestRouter>,
    config: StreamableConfig,
}

impl McpServer {
    /// Start building a server.
    pub fn builder(name: impl Into<String>, version: impl Into<String>) -> McpServerBuilder {
        McpServerBuilder::new(name, version)
    }

    /// Implementation info advertised at `initialize`.
    pub fn info(&self) -> &Implementation {
        &self.info
    }

    /// The router, for driving the server without a transport (tests).
    pub fn router(&self) -> &Arc<RequestRouter> {
        &self.router
    }

    /// Wrap the server in the streamable HTTP transport.
    pub fn streamable(self) -> StreamableServer<RequestRouter> {
        StreamableServer::new(self.config, self.router)
    }

    /// Build the legacy (2024-11-05) router sharing this server's
    /// dispatch, backed by the given streamable server's session store.
    pub fn legacy_router(
        router: Arc<RequestRouter>,
        config: LegacyConfig,
        store: Arc<duplexmcp_transport::SessionStore>,
    ) -> axum::Router {
        legacy_router(config, store, router)
    }

    /// Bind and serve the streamable HTTP transport.
    pub async fn run_streamable(self, addr: &str) -> TransportResult<()> {
        info!(server = %self.info.name, version = %self.info.version, %addr, "starting MCP server");
        self.streamable().serve(addr).await
    }
}
