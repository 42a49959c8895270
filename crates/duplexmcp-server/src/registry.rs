//! Handler registry.
//!
//! One mapping per kind: tools and prompts by name, resources by exact
//! URI, resource templates as an ordered list, completion providers keyed
//! by `(reference kind, name-or-URI, argument name)`. Registration is
//! normally append-only during setup but replacement is permitted and
//! guarded by the registry locks.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::warn;

use duplexmcp_protocol::types::{
    CompletionReference, Prompt, Resource, ResourceTemplate, Tool,
};

use crate::handlers::{CompletionProvider, PromptHandler, ResourceHandler, ToolHandler};

/// A registered tool: descriptor plus its handler.
pub struct RegisteredTool {
    /// Tool descriptor served by `tools/list`
    pub descriptor: Tool,
    /// The callable
    pub handler: Arc<dyn ToolHandler>,
}

/// A registered prompt.
pub struct RegisteredPrompt {
    /// Prompt descriptor served by `prompts/list`
    pub descriptor: Prompt,
    /// The expander
    pub handler: Arc<dyn PromptHandler>,
}

/// A registered exact-URI resource.
pub struct RegisteredResource {
    /// Resource descriptor served by `resources/list`
    pub descriptor: Resource,
    /// The reader
    pub handler: Arc<dyn ResourceHandler>,
}

/// A registered resource template.
pub struct RegisteredTemplate {
    /// Template descriptor served by `resources/templates/list`
    pub descriptor: ResourceTemplate,
    matcher: UriTemplate,
    /// The reader
    pub handler: Arc<dyn ResourceHandler>,
}

/// Key of a completion provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompletionKey {
    /// `ref/prompt` or `ref/resource`
    pub reference: CompletionRefKind,
    /// Prompt name or resource URI (template)
    pub target: String,
    /// Argument name being completed
    pub argument: String,
}

/// Completion reference kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionRefKind {
    /// Prompt argument
    Prompt,
    /// Resource template variable
    Resource,
}

impl CompletionKey {
    /// Build the lookup key for an incoming `completion/complete`.
    pub fn from_reference(reference: &CompletionReference, argument: &str) -> Self {
        match reference {
            CompletionReference::Prompt { name } => Self {
                reference: CompletionRefKind::Prompt,
                target: name.clone(),
                argument: argument.to_string(),
            },
            CompletionReference::Resource { uri } => Self {
                reference: CompletionRefKind::Resource,
                target: uri.clone(),
                argument: argument.to_string(),
            },
        }
    }
}

/// A resource lookup result: the handler plus any template variables.
pub struct ResolvedResource {
    /// The reader to invoke
    pub handler: Arc<dyn ResourceHandler>,
    /// Variables extracted from a template match (empty for exact URIs)
    pub template_values: HashMap<String, String>,
}

/// The server's handler registry.
#[derive(Default)]
pub struct HandlerRegistry {
    tools: DashMap<String, Arc<RegisteredTool>>,
    prompts: DashMap<String, Arc<RegisteredPrompt>>,
    resources: DashMap<String, Arc<RegisteredResource>>,
    templates: RwLock<Vec<Arc<RegisteredTemplate>>>,
    completions: DashMap<CompletionKey, Arc<dyn CompletionProvider>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a tool.
    pub fn register_tool(&self, descriptor: Tool, handler: Arc<dyn ToolHandler>) {
        let name = descriptor.name.clone();
        if self
            .tools
            .insert(name.clone(), Arc::new(RegisteredTool { descriptor, handler }))
            .is_some()
        {
            warn!(tool = %name, "replacing registered tool");
        }
    }

    /// Look up a tool by name.
    pub fn tool(&self, name: &str) -> Option<Arc<RegisteredTool>> {
        self.tools.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Descriptors of all registered tools, name-ordered.
    pub fn list_tools(&self) -> Vec<Tool> {
        let mut tools: Vec<Tool> = self
            .tools
            .iter()
            .map(|entry| entry.value().descriptor.clone())
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Register (or replace) a prompt.
    pub fn register_prompt(&self, descriptor: Prompt, handler: Arc<dyn PromptHandler>) {
        let name = descriptor.name.clone();
        if self
            .prompts
            .insert(
                name.clone(),
                Arc::new(RegisteredPrompt { descriptor, handler }),
            )
            .is_some()
        {
            warn!(prompt = %name, "replacing registered prompt");
        }
    }

    /// Look up a prompt by name.
    pub fn prompt(&self, name: &str) -> Option<Arc<RegisteredPrompt>> {
        self.prompts.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Descriptors of all registered prompts, name-ordered.
    pub fn list_prompts(&self) -> Vec<Prompt> {
        let mut prompts: Vec<Prompt> = self
            .prompts
            .iter()
            .map(|entry| entry.value().descriptor.clone())
            .collect();
        prompts.sort_by(|a, b| a.name.cmp(&b.name));
        prompts
    }

    /// Register (or replace) an exact-URI resource.
    pub fn register_resource(&self, descriptor: Resource, handler: Arc<dyn ResourceHandler>) {
        let uri = descriptor.uri.clone();
        if self
            .resources
            .insert(
                uri.clone(),
                Arc::new(RegisteredResource { descriptor, handler }),
            )
            .is_some()
        {
            warn!(uri = %uri, "replacing registered resource");
        }
    }

    /// Register a resource template. Templates match in registration
    /// order, after exact URIs.
    pub fn register_template(&self, descriptor: ResourceTemplate, handler: Arc<dyn ResourceHandler>) {
        let matcher = UriTemplate::parse(&descriptor.uri_template);
        self.templates.write().push(Arc::new(RegisteredTemplate {
            descriptor,
            matcher,
            handler,
        }));
    }

    /// Descriptors of all registered resources, URI-ordered.
    pub fn list_resources(&self) -> Vec<Resource> {
        let mut resources: Vec<Resource> = self
            .resources
            .iter()
            .map(|entry| entry.value().descriptor.clone())
            .collect();
        resources.sort_by(|a, b| a.uri.cmp(&b.uri));
        resources
    }

    /// Descriptors of all registered templates, in registration order.
    pub fn list_templates(&self) -> Vec<ResourceTemplate> {
        self.templates
            .read()
            .iter()
            .map(|template| template.descriptor.clone())
            .collect()
    }

    /// Resolve a `resources/read` URI: exact matches first, then
    /// templates in registration order.
    pub fn resolve_resource(&self, uri: &str) -> Option<ResolvedResource> {
        if let Some(resource) = self.resources.get(uri) {
            return Some(ResolvedResource {
                handler: Arc::clone(&resource.value().handler),
                template_values: HashMap::new(),
            });
        }
        let templates = self.templates.read();
        for template in templates.iter() {
            if let Some(values) = template.matcher.matches(uri) {
                return Some(ResolvedResource {
                    handler: Arc::clone(&template.handler),
                    template_values: values,
                });
            }
        }
        None
    }

    /// Register (or replace) a completion provider.
    pub fn register_completion(&self, key: CompletionKey, provider: Arc<dyn CompletionProvider>) {
        if self.completions.insert(key.clone(), provider).is_some() {
            warn!(?key, "replacing completion provider");
        }
    }

    /// Look up a completion provider.
    pub fn completion(&self, key: &CompletionKey) -> Option<Arc<dyn CompletionProvider>> {
        self.completions
            .get(key)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Whether any tools are registered.
    pub fn has_tools(&self) -> bool {
        !self.tools.is_empty()
    }

    /// Whether any prompts are registered.
    pub fn has_prompts(&self) -> bool {
        !self.prompts.is_empty()
    }

    /// Whether any resources or templates are registered.
    pub fn has_resources(&self) -> bool {
        !self.resources.is_empty() || !self.templates.read().is_empty()
    }

    /// Whether any completion providers are registered.
    pub fn has_completions(&self) -> bool {
        !self.completions.is_empty()
    }
}

/// `{var}` URI expansion pattern.
///
/// Literal runs must appear verbatim; each variable matches the shortest
/// non-empty span up to the next literal run (or the rest of the URI when
/// it is the final segment).
struct UriTemplate {
    segments: Vec<TemplateSegment>,
}

enum TemplateSegment {
    Literal(String),
    Variable(String),
}

impl UriTemplate {
    fn parse(pattern: &str) -> Self {
        let mut segments = Vec::new();
        let mut rest = pattern;
        while let Some(open) = rest.find('{') {
            if open > 0 {
                segments.push(TemplateSegment::Literal(rest[..open].to_string()));
            }
            match rest[open..].find('}') {
                Some(close) => {
                    let name = &rest[open + 1..open + close];
                    segments.push(TemplateSegment::Variable(name.to_string()));
                    rest = &rest[open + close + 1..];
                }
                None => {
                    // Unbalanced brace: treat the remainder literally
                    segments.push(TemplateSegment::Literal(rest[open..].to_string()));
                    rest = "";
                }
            }
        }
        if !rest.is_empty() {
            segments.push(TemplateSegment::Literal(rest.to_string()));
        }
        Self { segments }
    }

    fn matches(&self, uri: &str) -> Option<HashMap<String, String>> {
        let mut values = HashMap::new();
        let mut rest = uri;
        let mut segments = self.segments.iter().peekable();

        while let Some(segment) = segments.next() {
            match segment {
                TemplateSegment::Literal(literal) => {
                    rest = rest.strip_prefix(literal.as_str())?;
                }
                TemplateSegment::Variable(name) => {
                    let value = match segments.peek() {
                        Some(TemplateSegment::Literal(next)) => {
                            let end = rest.find(next.as_str())?;
                            let (value, remainder) = rest.split_at(end);
                            rest = remainder;
                            value
                        }
                        // Adjacent variables are ambiguous; the first one
                        // takes everything and the next fails on empty
                        _ => {
                            let value = rest;
                            rest = "";
                            value
                        }
                    };
                    if value.is_empty() {
                        return None;
                    }
                    values.insert(name.clone(), value.to_string());
                }
            }
        }

        if rest.is_empty() {
            Some(values)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{resource_fn, tool_fn};
    use duplexmcp_protocol::types::{CallToolResult, ReadResourceResult, ResourceContents};

    fn noop_tool() -> Arc<dyn ToolHandler> {
        Arc::new(tool_fn(|_args, _ctx| async {
            Ok(CallToolResult::text("ok"))
        }))
    }

    fn noop_resource() -> Arc<dyn ResourceHandler> {
        Arc::new(resource_fn(|uri, _values, _ctx| async move {
            Ok(ReadResourceResult {
                contents: vec![ResourceContents::text(uri, "body")],
            })
        }))
    }

    #[test]
    fn test_tool_registration_and_listing() {
        let registry = HandlerRegistry::new();
        registry.register_tool(Tool::new("zeta"), noop_tool());
        registry.register_tool(Tool::new("alpha"), noop_tool());

        let listed = registry.list_tools();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, "alpha");
        assert!(registry.tool("zeta").is_some());
        assert!(registry.tool("missing").is_none());
    }

    #[test]
    fn test_exact_resource_wins_over_template() {
        let registry = HandlerRegistry::new();
        registry.register_template(
            ResourceTemplate::new("file:///{path}", "any-file"),
            noop_resource(),
        );
        registry.register_resource(
            Resource::new("file:///exact.txt", "exact"),
            noop_resource(),
        );

        let resolved = registry.resolve_resource("file:///exact.txt").unwrap();
        assert!(resolved.template_values.is_empty());

        let templated = registry.resolve_resource("file:///other.txt").unwrap();
        assert_eq!(templated.template_values["path"], "other.txt");
    }

    #[test]
    fn test_templates_match_in_registration_order() {
        let registry = HandlerRegistry::new();
        registry.register_template(
            ResourceTemplate::new("db://{table}/{id}", "row"),
            noop_resource(),
        );
        registry.register_template(
            ResourceTemplate::new("db://{rest}", "raw"),
            noop_resource(),
        );

        let resolved = registry.resolve_resource("db://users/42").unwrap();
        assert_eq!(resolved.template_values["table"], "users");
        assert_eq!(resolved.template_values["id"], "42");
    }

    #[test]
    fn test_template_rejects_partial_match() {
        let template = UriTemplate::parse("file:///{name}.txt");
        assert!(template.matches("file:///a.txt").is_some());
        assert!(template.matches("file:///a.json").is_none());
        assert!(template.matches("http:///a.txt").is_none());
        // Empty variable spans do not match
        assert!(template.matches("file:///.txt").is_none());
    }

    #[test]
    fn test_completion_key_lookup() {
        let registry = HandlerRegistry::new();
        let key = CompletionKey {
            reference: CompletionRefKind::Prompt,
            target: "greet".into(),
            argument: "name".into(),
        };
        registry.register_completion(
            key.clone(),
            Arc::new(crate::handlers::completion_fn(|_arg, _ctx| async {
                Ok(duplexmcp_protocol::types::Completion::default())
            })),
        );
        assert!(registry.completion(&key).is_some());

        let from_wire = CompletionKey::from_reference(
            &CompletionReference::Prompt {
                name: "greet".into(),
            },
            "name",
        );
        assert_eq!(from_wire, key);
    }
}
