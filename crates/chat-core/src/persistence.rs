//! JSON persistence for conversation trees.
//!
//! Files use the node-map form: every node keyed by id, in creation order,
//! so sibling order survives a round trip. Writes go to a temp file in the
//! same directory and are renamed over the target.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ffi::OsStr;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{ChatError, Result};
use crate::message::{FileAttachment, GenerationParameters, MessageNode, ModelInfo, Role, TokenUsage};
use crate::tree::ConversationTree;

#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedConversation {
    pub conversation_id: String,
    #[serde(default)]
    pub title: String,
    pub root_id: String,
    pub active_branch: Vec<String>,
    pub nodes: IndexMap<String, PersistedNode>,
    /// Last visited child per parent, including branches that are not active.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selected_child: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedNode {
    pub role: Role,
    pub content: String,
    pub parent_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub model_info: ModelInfo,
    #[serde(default)]
    pub parameters: GenerationParameters,
    #[serde(default)]
    pub token_usage: TokenUsage,
    #[serde(default)]
    pub attached_files: Vec<FileAttachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
}

impl From<&ConversationTree> for PersistedConversation {
    fn from(tree: &ConversationTree) -> Self {
        let nodes = tree
            .creation_order
            .iter()
            .filter_map(|id| tree.nodes.get(id))
            .map(|node| {
                (
                    node.id.clone(),
                    PersistedNode {
                        role: node.role,
                        content: node.content.clone(),
                        parent_id: node.parent_id.clone(),
                        timestamp: node.timestamp,
                        model_info: node.model_info.clone(),
                        parameters: node.parameters.clone(),
                        token_usage: node.token_usage.clone().unwrap_or_default(),
                        attached_files: node.attached_files.clone(),
                        response_id: node.response_id.clone(),
                    },
                )
            })
            .collect();

        Self {
            conversation_id: tree.conversation_id.clone(),
            title: tree.title.clone(),
            root_id: tree.root_id.clone(),
            active_branch: tree.active_branch.clone(),
            nodes,
            selected_child: tree
                .selected_child
                .iter()
                .map(|(parent, child)| (parent.clone(), child.clone()))
                .collect(),
            created_at: Some(tree.created_at),
            updated_at: Some(tree.updated_at),
        }
    }
}

impl TryFrom<PersistedConversation> for ConversationTree {
    type Error = ChatError;

    fn try_from(file: PersistedConversation) -> Result<Self> {
        let conversation_id = file.conversation_id;
        let mut nodes = HashMap::with_capacity(file.nodes.len());
        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        let mut creation_order = Vec::with_capacity(file.nodes.len());
        let mut roots = Vec::new();

        for (id, record) in file.nodes {
            match &record.parent_id {
                Some(parent_id) => children.entry(parent_id.clone()).or_default().push(id.clone()),
                None => roots.push(id.clone()),
            }
            creation_order.push(id.clone());
            let token_usage = Some(record.token_usage).filter(|usage| !usage.is_empty());
            nodes.insert(
                id.clone(),
                MessageNode {
                    id,
                    conversation_id: conversation_id.clone(),
                    role: record.role,
                    content: record.content,
                    parent_id: record.parent_id,
                    timestamp: record.timestamp,
                    model_info: record.model_info,
                    parameters: record.parameters,
                    token_usage,
                    attached_files: record.attached_files,
                    response_id: record.response_id,
                },
            );
        }

        if roots.len() != 1 {
            return Err(ChatError::persistence(format!(
                "expected exactly one root message, found {}",
                roots.len()
            )));
        }
        if roots[0] != file.root_id {
            return Err(ChatError::persistence(format!(
                "root_id {} does not match parentless message {}",
                file.root_id, roots[0]
            )));
        }
        for parent_id in children.keys() {
            if !nodes.contains_key(parent_id) {
                return Err(ChatError::persistence(format!(
                    "message references missing parent {parent_id}"
                )));
            }
        }
        let reachable = count_reachable(&file.root_id, &children);
        if reachable != nodes.len() {
            return Err(ChatError::persistence(format!(
                "{} of {} messages are not reachable from the root",
                nodes.len() - reachable,
                nodes.len()
            )));
        }
        validate_active_branch(&file.active_branch, &file.root_id, &nodes)?;

        // Stale entries are dropped rather than failing the load.
        let selected_child = file
            .selected_child
            .into_iter()
            .filter(|(parent, child)| {
                nodes
                    .get(child)
                    .is_some_and(|node| node.parent_id.as_deref() == Some(parent.as_str()))
            })
            .collect();

        let now = Utc::now();
        let mut tree = ConversationTree {
            conversation_id,
            title: file.title,
            created_at: file.created_at.unwrap_or(now),
            updated_at: file.updated_at.unwrap_or(now),
            nodes,
            children,
            creation_order,
            root_id: file.root_id,
            active_branch: Vec::new(),
            selected_child,
        };
        let leaf = file
            .active_branch
            .last()
            .cloned()
            .unwrap_or_else(|| tree.root_id.clone());
        tree.set_active_leaf(&leaf)?;
        tree.updated_at = file.updated_at.unwrap_or(now);
        Ok(tree)
    }
}

fn count_reachable(root_id: &str, children: &HashMap<String, Vec<String>>) -> usize {
    let mut seen = HashSet::new();
    let mut stack = vec![root_id.to_string()];
    while let Some(id) = stack.pop() {
        if !seen.insert(id.clone()) {
            continue;
        }
        if let Some(kids) = children.get(&id) {
            stack.extend(kids.iter().cloned());
        }
    }
    seen.len()
}

fn validate_active_branch(
    branch: &[String],
    root_id: &str,
    nodes: &HashMap<String, MessageNode>,
) -> Result<()> {
    let Some(first) = branch.first() else {
        return Err(ChatError::persistence("active_branch is empty"));
    };
    if first != root_id {
        return Err(ChatError::persistence("active_branch does not start at the root"));
    }
    for pair in branch.windows(2) {
        let child = nodes
            .get(&pair[1])
            .ok_or_else(|| ChatError::persistence(format!("active_branch names unknown message {}", pair[1])))?;
        if child.parent_id.as_deref() != Some(pair[0].as_str()) {
            return Err(ChatError::persistence(format!(
                "active_branch is broken between {} and {}",
                pair[0], pair[1]
            )));
        }
    }
    Ok(())
}

pub fn to_json(tree: &ConversationTree) -> Result<String> {
    serde_json::to_string_pretty(&PersistedConversation::from(tree))
        .map_err(|e| ChatError::persistence(format!("failed to serialize conversation: {e}")))
}

pub fn from_json(json: &str) -> Result<ConversationTree> {
    let file: PersistedConversation = serde_json::from_str(json)
        .map_err(|e| ChatError::persistence(format!("malformed conversation file: {e}")))?;
    ConversationTree::try_from(file)
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub title: String,
    pub message_count: usize,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Directory of `<conversation_id>.json` files.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    base_path: PathBuf,
}

impl ConversationStore {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.base_path).map_err(|e| {
            ChatError::persistence(format!(
                "failed to create {}: {e}",
                self.base_path.display()
            ))
        })
    }

    pub fn save(&self, tree: &ConversationTree) -> Result<PathBuf> {
        self.init()?;
        let path = self.conversation_path(tree.conversation_id());
        let json = to_json(tree)?;

        let tmp_path = self.base_path.join(format!(
            ".{}.{}.tmp",
            tree.conversation_id(),
            uuid::Uuid::new_v4().simple()
        ));

        let write_result = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(json.as_bytes())?;
            file.flush()?;
            file.sync_all()?;
            drop(file);
            fs::rename(&tmp_path, &path)
        })();

        if let Err(e) = write_result {
            let _ = fs::remove_file(&tmp_path);
            return Err(ChatError::persistence(format!(
                "failed to write {}: {e}",
                path.display()
            )));
        }

        log::debug!(
            "[{}] Saved {} messages to {}",
            tree.conversation_id(),
            tree.len(),
            path.display()
        );
        Ok(path)
    }

    /// Save and log instead of failing; used after exchanges and navigation.
    pub fn save_quietly(&self, tree: &ConversationTree) -> bool {
        match self.save(tree) {
            Ok(_) => true,
            Err(e) => {
                log::warn!("[{}] Autosave failed: {}", tree.conversation_id(), e);
                false
            }
        }
    }

    /// Load by conversation id or by file name inside the store directory.
    pub fn load(&self, name_or_id: &str) -> Result<ConversationTree> {
        let path = self.resolve(name_or_id)?;
        let content = fs::read_to_string(&path).map_err(|e| {
            ChatError::persistence(format!("failed to read {}: {e}", path.display()))
        })?;
        let tree = from_json(&content)?;
        log::info!(
            "[{}] Loaded {} messages from {}",
            tree.conversation_id(),
            tree.len(),
            path.display()
        );
        Ok(tree)
    }

    pub fn delete(&self, conversation_id: &str) -> Result<bool> {
        let conversation_id = plain_name(conversation_id)?;
        match fs::remove_file(self.conversation_path(conversation_id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ChatError::persistence(format!(
                "failed to delete conversation {conversation_id}: {e}"
            ))),
        }
    }

    /// Every readable conversation in the directory, newest first.
    /// Unreadable files are skipped with a warning.
    pub fn list(&self) -> Result<Vec<ConversationSummary>> {
        let entries = match fs::read_dir(&self.base_path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ChatError::persistence(format!(
                    "failed to list {}: {e}",
                    self.base_path.display()
                )))
            }
        };

        let mut summaries = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let is_json = path.extension().is_some_and(|ext| ext == "json");
            let hidden = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with('.'));
            if !is_json || hidden {
                continue;
            }
            let parsed = fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|content| {
                    serde_json::from_str::<PersistedConversation>(&content).map_err(|e| e.to_string())
                });
            match parsed {
                Ok(file) => summaries.push(ConversationSummary {
                    message_count: file.nodes.len(),
                    conversation_id: file.conversation_id,
                    title: file.title,
                    updated_at: file.updated_at,
                }),
                Err(e) => log::warn!("Skipping unreadable conversation {}: {}", path.display(), e),
            }
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    pub fn conversation_path(&self, conversation_id: &str) -> PathBuf {
        self.base_path.join(format!("{conversation_id}.json"))
    }

    fn resolve(&self, name_or_id: &str) -> Result<PathBuf> {
        let name = plain_name(name_or_id)?;
        let candidates = [
            self.conversation_path(name.trim_end_matches(".json")),
            self.base_path.join(name),
        ];
        candidates
            .into_iter()
            .find(|path| path.is_file())
            .ok_or_else(|| ChatError::not_found(format!("conversation {name}")))
    }
}

/// Trimmed `name` if it names a file directly inside the store directory.
fn plain_name(name: &str) -> Result<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ChatError::validation("conversation name cannot be empty"));
    }
    let is_plain = !trimmed.contains(['/', '\\'])
        && Path::new(trimmed).file_name() == Some(OsStr::new(trimmed));
    if !is_plain {
        return Err(ChatError::validation(format!(
            "conversation name {trimmed} must not contain a path"
        )));
    }
    Ok(trimmed)
}
