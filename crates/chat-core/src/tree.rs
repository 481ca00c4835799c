use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{ChatError, Result};
use crate::message::{generate_id, ContextMessage, MessageNode, ModelInfo, NodeDraft, Role, TokenUsage};

/// All messages of one conversation plus their parent/child adjacency.
///
/// Nodes live in a flat map keyed by id. Child order is an explicit list per
/// parent, so sibling rank is creation order and never depends on map
/// iteration.
#[derive(Debug, Clone)]
pub struct ConversationTree {
    pub(crate) conversation_id: String,
    pub(crate) title: String,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
    pub(crate) nodes: HashMap<String, MessageNode>,
    pub(crate) children: HashMap<String, Vec<String>>,
    pub(crate) creation_order: Vec<String>,
    pub(crate) root_id: String,
    pub(crate) active_branch: Vec<String>,
    /// For each node, the child that was last on the active branch.
    pub(crate) selected_child: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub id: String,
    pub role: Role,
    pub preview: String,
    pub parent_id: Option<String>,
    pub sibling_index: usize,
    pub sibling_count: usize,
    pub active: bool,
    pub timestamp: DateTime<Utc>,
}

/// Read-only projection of the tree for visualization.
#[derive(Debug, Clone, Serialize)]
pub struct TreeGraph {
    pub conversation_id: String,
    pub root_id: String,
    pub active_branch: Vec<String>,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<(String, String)>,
}

const PREVIEW_CHARS: usize = 80;

impl ConversationTree {
    /// Start a conversation whose root is a system node carrying `system_prompt`.
    pub fn new(title: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        let conversation_id = generate_id();
        let root = NodeDraft::new(Role::System, system_prompt, None).into_node(&conversation_id);
        let root_id = root.id.clone();
        let now = Utc::now();

        let mut nodes = HashMap::new();
        nodes.insert(root_id.clone(), root);

        log::debug!("[{}] Created conversation tree (root {})", conversation_id, root_id);

        Self {
            conversation_id,
            title: title.into(),
            created_at: now,
            updated_at: now,
            nodes,
            children: HashMap::new(),
            creation_order: vec![root_id.clone()],
            active_branch: vec![root_id.clone()],
            root_id,
            selected_child: HashMap::new(),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.touch();
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn active_branch(&self) -> &[String] {
        &self.active_branch
    }

    pub fn active_leaf_id(&self) -> &str {
        self.active_branch
            .last()
            .map(String::as_str)
            .unwrap_or(self.root_id.as_str())
    }

    pub fn active_leaf(&self) -> &MessageNode {
        &self.nodes[self.active_leaf_id()]
    }

    /// Node ids in creation order.
    pub fn node_ids(&self) -> &[String] {
        &self.creation_order
    }

    pub fn create_node(
        &mut self,
        role: Role,
        content: impl Into<String>,
        parent_id: &str,
    ) -> Result<MessageNode> {
        self.insert_node(NodeDraft::new(role, content, Some(parent_id.to_string())))
    }

    /// Build a node from `draft`, link it under its parent and register it.
    ///
    /// The node is fully linked before this returns; the active branch is not
    /// touched.
    pub fn insert_node(&mut self, draft: NodeDraft) -> Result<MessageNode> {
        let parent_id = draft
            .parent_id
            .clone()
            .ok_or_else(|| ChatError::validation("a conversation has exactly one root"))?;
        if !self.nodes.contains_key(&parent_id) {
            return Err(ChatError::validation(format!(
                "parent message {parent_id} does not exist"
            )));
        }
        if draft.role == Role::User && draft.content.trim().is_empty() {
            return Err(ChatError::validation("message content cannot be empty"));
        }

        let node = draft.into_node(&self.conversation_id);
        let id = node.id.clone();

        log::debug!(
            "[{}] Adding {} node {} under {}",
            self.conversation_id,
            node.role,
            id,
            parent_id
        );

        self.children.entry(parent_id).or_default().push(id.clone());
        self.creation_order.push(id.clone());
        self.nodes.insert(id, node.clone());
        self.touch();

        Ok(node)
    }

    /// Create a node under the current active leaf and extend the active
    /// branch to it.
    pub fn append_to_active(&mut self, mut draft: NodeDraft) -> Result<MessageNode> {
        draft.parent_id = Some(self.active_leaf_id().to_string());
        let node = self.insert_node(draft)?;
        self.set_active_leaf(&node.id)?;
        Ok(node)
    }

    pub fn get_node(&self, id: &str) -> Result<&MessageNode> {
        self.nodes
            .get(id)
            .ok_or_else(|| ChatError::not_found(format!("message {id}")))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn children_of(&self, id: &str) -> Result<&[String]> {
        self.get_node(id)?;
        Ok(self
            .children
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or(&[]))
    }

    /// Walk parent pointers from `id` up to the root; returns root first.
    pub fn path_to_root(&self, id: &str) -> Result<Vec<&MessageNode>> {
        let mut path = Vec::new();
        let mut current = Some(self.get_node(id)?);

        while let Some(node) = current {
            if path.len() > self.nodes.len() {
                return Err(ChatError::validation(format!(
                    "cycle detected while walking ancestors of {id}"
                )));
            }
            path.push(node);
            current = match &node.parent_id {
                Some(parent_id) => Some(self.nodes.get(parent_id).ok_or_else(|| {
                    ChatError::validation(format!(
                        "message {} has dangling parent {parent_id}",
                        node.id
                    ))
                })?),
                None => None,
            };
        }

        path.reverse();
        Ok(path)
    }

    pub fn path_ids_to_root(&self, id: &str) -> Result<Vec<String>> {
        Ok(self
            .path_to_root(id)?
            .into_iter()
            .map(|node| node.id.clone())
            .collect())
    }

    /// The exact context sent upstream for a completion after `id`.
    ///
    /// Root-first, roles preserved. An empty system root is left out.
    pub fn messages_to_root(&self, id: &str) -> Result<Vec<ContextMessage>> {
        Ok(self
            .path_to_root(id)?
            .into_iter()
            .filter(|node| !(node.is_root() && node.content.trim().is_empty()))
            .map(ContextMessage::from)
            .collect())
    }

    /// Make the path ending at `leaf_id` the active branch.
    pub fn set_active_leaf(&mut self, leaf_id: &str) -> Result<()> {
        let path = self.path_ids_to_root(leaf_id)?;
        for pair in path.windows(2) {
            self.selected_child.insert(pair[0].clone(), pair[1].clone());
        }
        self.active_branch = path;
        Ok(())
    }

    /// Follow remembered selections (or the newest child) down to a leaf.
    pub fn descend_to_leaf(&self, id: &str) -> Result<String> {
        let mut current = self.get_node(id)?.id.clone();
        loop {
            let children = self.children.get(&current).map(Vec::as_slice).unwrap_or(&[]);
            let next = self
                .selected_child
                .get(&current)
                .filter(|selected| children.contains(selected))
                .or_else(|| children.last());
            match next {
                Some(child) => current = child.clone(),
                None => return Ok(current),
            }
        }
    }

    /// Fill in usage and model details that arrive after a stream completes.
    /// This is the only mutation allowed on an existing node.
    pub fn record_completion(
        &mut self,
        id: &str,
        token_usage: Option<TokenUsage>,
        model_info: Option<ModelInfo>,
    ) -> Result<()> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| ChatError::not_found(format!("message {id}")))?;
        if token_usage.is_some() {
            node.token_usage = token_usage;
        }
        if let Some(model_info) = model_info {
            node.model_info = model_info;
        }
        self.touch();
        Ok(())
    }

    /// The sibling group of `id`: children of its parent that share its role,
    /// in creation order. The root is alone in its group.
    pub fn sibling_ids(&self, id: &str) -> Result<Vec<String>> {
        let node = self.get_node(id)?;
        let Some(parent_id) = &node.parent_id else {
            return Ok(vec![node.id.clone()]);
        };
        Ok(self
            .children_of(parent_id)?
            .iter()
            .filter(|child| {
                self.nodes
                    .get(child.as_str())
                    .is_some_and(|sibling| sibling.role == node.role)
            })
            .cloned()
            .collect())
    }

    /// Rank of `id` within its sibling group, with the group size.
    pub fn sibling_position(&self, id: &str) -> Result<(usize, usize)> {
        let siblings = self.sibling_ids(id)?;
        let index = siblings
            .iter()
            .position(|sibling| sibling == id)
            .ok_or_else(|| ChatError::validation(format!("message {id} is not linked under its parent")))?;
        Ok((index, siblings.len()))
    }

    pub fn graph(&self) -> TreeGraph {
        let mut nodes = Vec::with_capacity(self.creation_order.len());
        let mut edges = Vec::new();

        for id in &self.creation_order {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            let (sibling_index, sibling_count) = self.sibling_position(id).unwrap_or((0, 1));
            if let Some(parent_id) = &node.parent_id {
                edges.push((parent_id.clone(), id.clone()));
            }
            nodes.push(GraphNode {
                id: id.clone(),
                role: node.role,
                preview: preview(&node.content),
                parent_id: node.parent_id.clone(),
                sibling_index,
                sibling_count,
                active: self.active_branch.contains(id),
                timestamp: node.timestamp,
            });
        }

        TreeGraph {
            conversation_id: self.conversation_id.clone(),
            root_id: self.root_id.clone(),
            active_branch: self.active_branch.clone(),
            nodes,
            edges,
        }
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

fn preview(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
