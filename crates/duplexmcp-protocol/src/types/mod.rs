//! MCP payload types.
//!
//! Request/result shapes for every protocol operation, grouped by feature
//! family. Unknown fields are tolerated everywhere for forward
//! compatibility; serialized names follow the protocol's camelCase.

mod capabilities;
mod completion;
mod content;
mod core;
mod elicitation;
mod initialization;
mod logging;
mod prompts;
mod resources;
mod roots;
mod sampling;
mod tools;

pub use capabilities::{
    ClientCapabilities, PromptsCapability, ResourcesCapability, RootsCapability,
    ServerCapabilities, ToolsCapability,
};
pub use completion::{
    CompleteArgument, CompleteRequest, CompleteResult, Completion, CompletionReference,
};
pub use content::{
    AudioContent, BlobResourceContents, ContentBlock, EmbeddedResource, ImageContent,
    ResourceContents, TextContent, TextResourceContents,
};
pub use core::{CancelledNotification, Cursor, EmptyResult, Implementation, Role};
pub use elicitation::{ElicitAction, ElicitRequest, ElicitResult};
pub use initialization::{InitializeRequest, InitializeResult};
pub use logging::{LoggingLevel, LoggingMessageNotification, SetLevelRequest};
pub use prompts::{
    GetPromptRequest, GetPromptResult, ListPromptsRequest, ListPromptsResult, Prompt,
    PromptArgument, PromptMessage,
};
pub use resources::{
    ListResourceTemplatesRequest, ListResourceTemplatesResult, ListResourcesRequest,
    ListResourcesResult, ReadResourceRequest, ReadResourceResult, Resource, ResourceTemplate,
};
pub use roots::{ListRootsResult, Root};
pub use sampling::{CreateMessageRequest, CreateMessageResult, SamplingMessage};
pub use tools::{CallToolRequest, CallToolResult, ListToolsRequest, ListToolsResult, Tool};
