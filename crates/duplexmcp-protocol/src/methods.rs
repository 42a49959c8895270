//! Protocol method names.

/// `initialize` handshake request
pub const INITIALIZE: &str = "initialize";
/// Liveness check, legal in both directions
pub const PING: &str = "ping";

/// List registered tools
pub const TOOLS_LIST: &str = "tools/list";
/// Invoke a tool
pub const TOOLS_CALL: &str = "tools/call";

/// List registered prompts
pub const PROMPTS_LIST: &str = "prompts/list";
/// Expand a prompt
pub const PROMPTS_GET: &str = "prompts/get";

/// List registered resources
pub const RESOURCES_LIST: &str = "resources/list";
/// List registered resource templates
pub const RESOURCES_TEMPLATES_LIST: &str = "resources/templates/list";
/// Read a resource by URI
pub const RESOURCES_READ: &str = "resources/read";

/// Argument completion
pub const COMPLETION_COMPLETE: &str = "completion/complete";
/// Set the session's minimum log level
pub const LOGGING_SET_LEVEL: &str = "logging/setLevel";

/// Server-initiated LLM sampling
pub const SAMPLING_CREATE_MESSAGE: &str = "sampling/createMessage";
/// Server-initiated roots listing
pub const ROOTS_LIST: &str = "roots/list";
/// Server-initiated user elicitation
pub const ELICITATION_CREATE: &str = "elicitation/create";

/// Client confirms the handshake
pub const NOTIFICATION_INITIALIZED: &str = "notifications/initialized";
/// In-flight request cancellation
pub const NOTIFICATION_CANCELLED: &str = "notifications/cancelled";
/// Log / progress message
pub const NOTIFICATION_MESSAGE: &str = "notifications/message";
/// Client roots changed
pub const NOTIFICATION_ROOTS_LIST_CHANGED: &str = "notifications/roots/list_changed";
