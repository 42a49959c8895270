//! Handler contracts for tools, prompts, resources, and completion.
//!
//! Applications implement these traits (or use the closure adapters) and
//! register implementations together with their descriptors.

use std::collections::HashMap;
use std::future::Future;

use async_trait::async_trait;
use serde_json::Value;

use duplexmcp_protocol::types::{
    CallToolResult, CompleteArgument, Completion, GetPromptResult, ReadResourceResult,
};

use crate::context::ServerCtx;
use crate::error::ServerResult;

/// A callable tool.
#[async_trait]
pub trait ToolHandler: Send + Sync + 'static {
    /// Execute the tool.
    async fn call(
        &self,
        arguments: Option<HashMap<String, Value>>,
        ctx: ServerCtx,
    ) -> ServerResult<CallToolResult>;
}

/// A prompt expander.
#[async_trait]
pub trait PromptHandler: Send + Sync + 'static {
    /// Expand the prompt with the given arguments.
    async fn get(
        &self,
        arguments: Option<HashMap<String, String>>,
        ctx: ServerCtx,
    ) -> ServerResult<GetPromptResult>;
}

/// A resource reader. Template handlers receive the variables extracted
/// from the matched URI.
#[async_trait]
pub trait ResourceHandler: Send + Sync + 'static {
    /// Read the resource at `uri`.
    async fn read(
        &self,
        uri: &str,
        template_values: HashMap<String, String>,
        ctx: ServerCtx,
    ) -> ServerResult<ReadResourceResult>;
}

/// An argument completion provider.
#[async_trait]
pub trait CompletionProvider: Send + Sync + 'static {
    /// Produce candidates for a partially typed argument.
    async fn complete(&self, argument: CompleteArgument, ctx: ServerCtx)
        -> ServerResult<Completion>;
}

/// Adapt an async closure into a [`ToolHandler`].
pub fn tool_fn<F, Fut>(f: F) -> impl ToolHandler
where
    F: Fn(Option<HashMap<String, Value>>, ServerCtx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ServerResult<CallToolResult>> + Send + 'static,
{
    FnTool { f }
}

struct FnTool<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> ToolHandler for FnTool<F>
where
    F: Fn(Option<HashMap<String, Value>>, ServerCtx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ServerResult<CallToolResult>> + Send + 'static,
{
    async fn call(
        &self,
        arguments: Option<HashMap<String, Value>>,
        ctx: ServerCtx,
    ) -> ServerResult<CallToolResult> {
        (self.f)(arguments, ctx).await
    }
}

/// Adapt an async closure into a [`PromptHandler`].
pub fn prompt_fn<F, Fut>(f: F) -> impl PromptHandler
where
    F: Fn(Option<HashMap<String, String>>, ServerCtx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ServerResult<GetPromptResult>> + Send + 'static,
{
    FnPrompt { f }
}

struct FnPrompt<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> PromptHandler for FnPrompt<F>
where
    F: Fn(Option<HashMap<String, String>>, ServerCtx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ServerResult<GetPromptResult>> + Send + 'static,
{
    async fn get(
        &self,
        arguments: Option<HashMap<String, String>>,
        ctx: ServerCtx,
    ) -> ServerResult<GetPromptResult> {
        (self.f)(arguments, ctx).await
    }
}

/// Adapt an async closure into a [`ResourceHandler`].
pub fn resource_fn<F, Fut>(f: F) -> impl ResourceHandler
where
    F: Fn(String, HashMap<String, String>, ServerCtx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ServerResult<ReadResourceResult>> + Send + 'static,
{
    FnResource { f }
}

struct FnResource<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> ResourceHandler for FnResource<F>
where
    F: Fn(String, HashMap<String, String>, ServerCtx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ServerResult<ReadResourceResult>> + Send + 'static,
{
    async fn read(
        &self,
        uri: &str,
        template_values: HashMap<String, String>,
        ctx: ServerCtx,
    ) -> ServerResult<ReadResourceResult> {
        (self.f)(uri.to_string(), template_values, ctx).await
    }
}

/// Adapt an async closure into a [`CompletionProvider`].
pub fn completion_fn<F, Fut>(f: F) -> impl CompletionProvider
where
    F: Fn(CompleteArgument, ServerCtx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ServerResult<Completion>> + Send + 'static,
{
    FnCompletion { f }
}

struct FnCompletion<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> CompletionProvider for FnCompletion<F>
where
    F: Fn(CompleteArgument, ServerCtx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ServerResult<Completion>> + Send + 'static,
{
    async fn complete(
        &self,
        argument: CompleteArgument,
        ctx: ServerCtx,
    ) -> ServerResult<Completion> {
        (self.f)(argument, ctx).await
    }
}
