//! Argument completion types.

use serde::{Deserialize, Serialize};

/// `completion/complete` request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteRequest {
    /// What the completion is for
    #[serde(rename = "ref")]
    pub reference: CompletionReference,
    /// The argument being completed
    pub argument: CompleteArgument,
}

/// Completion reference: a prompt by name or a resource by URI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CompletionReference {
    /// Prompt argument completion
    #[serde(rename = "ref/prompt")]
    Prompt {
        /// Prompt name
        name: String,
    },
    /// Resource template variable completion
    #[serde(rename = "ref/resource")]
    Resource {
        /// Resource or template URI
        uri: String,
    },
}

impl CompletionReference {
    /// The name or URI this reference points at
    pub fn target(&self) -> &str {
        match self {
            Self::Prompt { name } => name,
            Self::Resource { uri } => uri,
        }
    }
}

/// Argument under completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteArgument {
    /// Argument name
    pub name: String,
    /// Partial value typed so far
    pub value: String,
}

/// `completion/complete` result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteResult {
    /// The completion payload
    pub completion: Completion,
}

/// Completion values
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Completion {
    /// Candidate values (at most 100)
    pub values: Vec<String>,
    /// Total number of candidates, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    /// Whether more candidates exist beyond `values`
    #[serde(rename = "hasMore", skip_serializing_if = "Option::is_none")]
    pub has_more: Option<bool>,
}
