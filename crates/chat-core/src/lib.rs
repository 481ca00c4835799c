//! `chat-core` holds the branching conversation tree: the message data model,
//! the arena-style tree store, retry/sibling navigation and the JSON
//! persistence codec.

pub mod error;
pub mod message;
pub mod navigator;
pub mod persistence;
pub mod tree;

pub use error::{ChatError, Result};
pub use message::{
    ContextMessage, FileAttachment, GenerationParameters, MessageNode, ModelInfo, NodeDraft, Role,
    TokenUsage,
};
pub use navigator::{BranchPosition, Direction, RetryPlan, SiblingInfo};
pub use persistence::{ConversationStore, ConversationSummary, PersistedConversation};
pub use tree::{ConversationTree, GraphNode, TreeGraph};
