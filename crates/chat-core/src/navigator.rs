//! Retry-as-fork and sibling navigation on top of [`ConversationTree`].
//!
//! A retry never rewrites history: it adds a new assistant node next to the
//! one being retried and moves the active branch onto it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ChatError, Result};
use crate::message::{ContextMessage, MessageNode, NodeDraft, Role};
use crate::tree::ConversationTree;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Prev,
    Next,
    None,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Direction::Prev => "prev",
            Direction::Next => "next",
            Direction::None => "none",
        };
        f.write_str(name)
    }
}

impl FromStr for Direction {
    type Err = ChatError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "prev" | "previous" => Ok(Direction::Prev),
            "next" => Ok(Direction::Next),
            "none" => Ok(Direction::None),
            other => Err(ChatError::validation(format!("invalid direction: {other}"))),
        }
    }
}

/// Where a message sits among its siblings after a navigator operation.
#[derive(Debug, Clone, Serialize)]
pub struct BranchPosition {
    pub message: MessageNode,
    pub sibling_index: usize,
    pub total_siblings: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SiblingInfo {
    pub siblings: Vec<String>,
    pub current_index: usize,
    pub total: usize,
}

/// What a retry needs from the provider: the parent to attach under and the
/// context leading up to it.
#[derive(Debug, Clone)]
pub struct RetryPlan {
    pub target_id: String,
    pub parent_id: String,
    pub context: Vec<ContextMessage>,
}

impl ConversationTree {
    /// Validate a retry of `message_id` and collect the upstream context.
    pub fn prepare_retry(&self, message_id: &str) -> Result<RetryPlan> {
        let target = self
            .get_node(message_id)
            .map_err(|_| ChatError::validation(format!("unknown message id {message_id}")))?;
        if target.role != Role::Assistant {
            return Err(ChatError::validation(format!(
                "only assistant messages can be retried, {message_id} is a {} message",
                target.role
            )));
        }
        let parent_id = target
            .parent_id
            .clone()
            .ok_or_else(|| ChatError::validation("the root message cannot be retried"))?;
        let context = self.messages_to_root(&parent_id)?;

        Ok(RetryPlan {
            target_id: message_id.to_string(),
            parent_id,
            context,
        })
    }

    /// Link a freshly generated assistant reply as a new sibling of the
    /// retried message and make it the active leaf.
    pub fn attach_retry(&mut self, plan: &RetryPlan, draft: NodeDraft) -> Result<BranchPosition> {
        let draft = NodeDraft {
            parent_id: Some(plan.parent_id.clone()),
            ..draft
        };
        let message = self.insert_node(draft)?;
        self.set_active_leaf(&message.id)?;
        let (sibling_index, total_siblings) = self.sibling_position(&message.id)?;

        log::info!(
            "[{}] Retried {} as {} (sibling {}/{})",
            self.conversation_id,
            plan.target_id,
            message.id,
            sibling_index + 1,
            total_siblings
        );

        Ok(BranchPosition {
            message,
            sibling_index,
            total_siblings,
        })
    }

    /// Attach a reply under an explicit parent (the user message it answers)
    /// and make it the active leaf.
    pub fn attach_reply(&mut self, parent_id: &str, draft: NodeDraft) -> Result<MessageNode> {
        let draft = NodeDraft {
            parent_id: Some(parent_id.to_string()),
            ..draft
        };
        let message = self.insert_node(draft)?;
        self.set_active_leaf(&message.id)?;
        Ok(message)
    }

    pub fn switch_to_sibling(&mut self, message_id: &str, direction: Direction) -> Result<BranchPosition> {
        if !self.contains(message_id) {
            return Err(ChatError::validation(format!("unknown message id {message_id}")));
        }
        let siblings = self.sibling_ids(message_id)?;
        let (index, total) = self.sibling_position(message_id)?;

        let target_index = match direction {
            Direction::None => index,
            Direction::Prev if index == 0 => {
                return Err(ChatError::Bounds { direction, index, total });
            }
            Direction::Prev => index - 1,
            Direction::Next if index + 1 >= total => {
                return Err(ChatError::Bounds { direction, index, total });
            }
            Direction::Next => index + 1,
        };
        let target_id = siblings[target_index].clone();

        let leaf_id = match direction {
            Direction::None => target_id.clone(),
            Direction::Prev | Direction::Next => self.descend_to_leaf(&target_id)?,
        };
        self.set_active_leaf(&leaf_id)?;

        log::debug!(
            "[{}] Switched {} {} to {} (leaf {})",
            self.conversation_id,
            message_id,
            direction,
            target_id,
            leaf_id
        );

        Ok(BranchPosition {
            message: self.get_node(&target_id)?.clone(),
            sibling_index: target_index,
            total_siblings: total,
        })
    }

    pub fn get_message_siblings(&self, message_id: &str) -> Result<SiblingInfo> {
        let siblings = self.sibling_ids(message_id)?;
        let (current_index, total) = self.sibling_position(message_id)?;
        Ok(SiblingInfo {
            siblings,
            current_index,
            total,
        })
    }
}
