use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Developer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Developer => "developer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model that produced a message. Unknown provider fields are kept in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ModelInfo {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.provider.is_none() && self.version.is_none() && self.extra.is_empty()
    }
}

/// Snapshot of the generation settings used for a completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GenerationParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Token counts reported by the provider.
///
/// Providers disagree on the schema, so anything beyond the three common
/// counters passes through `extra` untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TokenUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens: Some(prompt_tokens),
            completion_tokens: Some(completion_tokens),
            total_tokens: Some(prompt_tokens + completion_tokens),
            extra: Map::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.prompt_tokens.is_none()
            && self.completion_tokens.is_none()
            && self.total_tokens.is_none()
            && self.extra.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileAttachment {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FileAttachment {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: None,
            mime_type: None,
            extra: Map::new(),
        }
    }
}

/// A single message in the conversation tree.
///
/// Nodes only know their parent; children are a query on the owning tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageNode {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub parent_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub model_info: ModelInfo,
    #[serde(default)]
    pub parameters: GenerationParameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    #[serde(default)]
    pub attached_files: Vec<FileAttachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
}

impl MessageNode {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Everything needed to create a node except the fields the tree assigns
/// (`id`, `conversation_id`, `timestamp`).
#[derive(Debug, Clone)]
pub struct NodeDraft {
    pub role: Role,
    pub content: String,
    pub parent_id: Option<String>,
    pub model_info: ModelInfo,
    pub parameters: GenerationParameters,
    pub token_usage: Option<TokenUsage>,
    pub attached_files: Vec<FileAttachment>,
    pub response_id: Option<String>,
}

impl NodeDraft {
    pub fn new(role: Role, content: impl Into<String>, parent_id: Option<String>) -> Self {
        Self {
            role,
            content: content.into(),
            parent_id,
            model_info: ModelInfo::default(),
            parameters: GenerationParameters::default(),
            token_usage: None,
            attached_files: Vec::new(),
            response_id: None,
        }
    }

    pub fn with_model_info(mut self, model_info: ModelInfo) -> Self {
        self.model_info = model_info;
        self
    }

    pub fn with_parameters(mut self, parameters: GenerationParameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_token_usage(mut self, token_usage: Option<TokenUsage>) -> Self {
        self.token_usage = token_usage;
        self
    }

    pub fn with_attachments(mut self, attached_files: Vec<FileAttachment>) -> Self {
        self.attached_files = attached_files;
        self
    }

    pub fn with_response_id(mut self, response_id: Option<String>) -> Self {
        self.response_id = response_id;
        self
    }

    pub(crate) fn into_node(self, conversation_id: &str) -> MessageNode {
        MessageNode {
            id: generate_id(),
            conversation_id: conversation_id.to_string(),
            role: self.role,
            content: self.content,
            parent_id: self.parent_id,
            timestamp: Utc::now(),
            model_info: self.model_info,
            parameters: self.parameters,
            token_usage: self.token_usage,
            attached_files: self.attached_files,
            response_id: self.response_id,
        }
    }
}

/// The projection of a node that is sent upstream as chat context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attached_files: Vec<FileAttachment>,
}

impl From<&MessageNode> for ContextMessage {
    fn from(node: &MessageNode) -> Self {
        Self {
            role: node.role,
            content: node.content.clone(),
            attached_files: node.attached_files.clone(),
        }
    }
}

pub(crate) fn generate_id() -> String {
    Uuid::new_v4().to_string()
}
