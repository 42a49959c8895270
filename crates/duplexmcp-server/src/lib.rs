//! # DuplexMCP Server
//!
//! The dispatch layer of the DuplexMCP runtime: handler registries for
//! tools, prompts, resources, and completion; a request router that
//! enforces the session state machine; an onion-style middleware chain;
//! and typed server-initiated operations (sampling, roots, elicitation)
//! available to handlers through [`ServerCtx`].
//!
//! ```rust,ignore
//! use duplexmcp_protocol::types::{CallToolResult, Tool};
//! use duplexmcp_server::{tool_fn, McpServer};
//!
//! let server = McpServer::builder("greeter", "1.0.0")
//!     .tool(
//!         Tool::new("greet").with_description("Say hello"),
//!         tool_fn(|args, _ctx| async move {
//!             let name = args
//!                 .and_then(|a| a.get("name").and_then(|v| v.as_str().map(String::from)))
//!                 .unwrap_or_else(|| "world".into());
//!             Ok(CallToolResult::text(format!("Hello, {name}!")))
//!         }),
//!     )
//!     .build();
//!
//! server.run_streamable("127.0.0.1:8080").await?;
//! ```

mod builder;
mod context;
mod error;
mod handlers;
mod middleware;
mod registry;
mod router;

pub use builder::{McpServer, McpServerBuilder};
pub use context::ServerCtx;
pub use error::{ServerError, ServerResult};
pub use handlers::{
    completion_fn, prompt_fn, resource_fn, tool_fn, CompletionProvider, PromptHandler,
    ResourceHandler, ToolHandler,
};
pub use middleware::{
    Middleware, Next, RecoveryMiddleware, TimeoutMiddleware, TracingMiddleware,
};
pub use registry::{
    CompletionKey, CompletionRefKind, HandlerRegistry, RegisteredPrompt, RegisteredResource,
    RegisteredTemplate, RegisteredTool, ResolvedResource,
};
pub use router::{RequestRouter, RootsChangedHook};
