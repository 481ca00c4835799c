use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chat_core::{
    BranchPosition, ChatError, ContextMessage, ConversationStore, ConversationSummary,
    ConversationTree, Direction, FileAttachment, MessageNode, NodeDraft, Result, RetryPlan, Role,
    SiblingInfo, TokenUsage, TreeGraph,
};
use chat_llm::ProviderClient;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::bridge::{self, DoneEvent, EventLoop, SseStream, StreamOptions, StreamedReply};
use crate::config::EngineConfig;

const DEFAULT_TITLE: &str = "New conversation";

type SharedTree = Arc<RwLock<Option<ConversationTree>>>;

#[derive(Debug, Clone, Serialize)]
pub struct ConversationStatus {
    pub conversation_id: Option<String>,
    pub title: Option<String>,
    pub message_count: usize,
    pub active_branch_length: usize,
    pub active_leaf_id: Option<String>,
    pub model: Option<String>,
    pub data_dir: PathBuf,
    pub event_loop_running: bool,
    pub active_streams: usize,
}

/// The API the route layer drives.
///
/// Every call blocks the calling thread; provider I/O and tree mutation run
/// on the event loop, reads go straight to the shared tree.
pub struct ConversationFacade {
    event_loop: Arc<EventLoop>,
    provider: Arc<dyn ProviderClient>,
    store: ConversationStore,
    config: EngineConfig,
    tree: SharedTree,
    writer: TreeWriter,
    active_streams: Arc<AtomicUsize>,
}

impl ConversationFacade {
    /// Build a facade on the process-wide event loop.
    pub fn new(provider: Arc<dyn ProviderClient>, config: EngineConfig) -> Result<Self> {
        Self::with_event_loop(provider, config, bridge::shared()?)
    }

    pub fn with_event_loop(
        provider: Arc<dyn ProviderClient>,
        config: EngineConfig,
        event_loop: Arc<EventLoop>,
    ) -> Result<Self> {
        let store = ConversationStore::new(&config.data_dir);
        store.init()?;
        log::info!("Conversation store at {}", store.base_path().display());

        let tree: SharedTree = Arc::new(RwLock::new(None));
        let writer = TreeWriter {
            store: store.clone(),
            tree: Arc::clone(&tree),
            lock: Arc::new(Mutex::new(())),
        };

        Ok(Self {
            event_loop,
            provider,
            store,
            config,
            tree,
            writer,
            active_streams: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start a fresh conversation and make it current. Returns its id.
    pub fn new_conversation(&self, title: &str) -> Result<String> {
        let title = if title.trim().is_empty() {
            DEFAULT_TITLE
        } else {
            title.trim()
        };
        let tree = ConversationTree::new(title, self.config.system_prompt.clone());
        let conversation_id = tree.conversation_id().to_string();
        log::info!("[{}] Created conversation \"{}\"", conversation_id, title);

        *self.tree.write() = Some(tree);
        self.autosave();
        Ok(conversation_id)
    }

    /// Replace the current conversation with one read from disk.
    pub fn load_conversation(&self, name_or_id: &str) -> Result<ConversationStatus> {
        let tree = self.store.load(name_or_id)?;
        log::info!(
            "[{}] Loaded conversation with {} messages",
            tree.conversation_id(),
            tree.len()
        );
        *self.tree.write() = Some(tree);
        Ok(self.get_status())
    }

    /// Explicit save; failures reach the caller.
    pub fn save_conversation(&self) -> Result<PathBuf> {
        self.writer.save()
    }

    pub fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        self.store.list()
    }

    /// Delete a conversation file, clearing the in-memory tree if it is the
    /// current conversation.
    pub fn delete_conversation(&self, conversation_id: &str) -> Result<bool> {
        {
            let mut current = self.tree.write();
            if current
                .as_ref()
                .is_some_and(|tree| tree.conversation_id() == conversation_id)
            {
                *current = None;
                log::info!("[{}] Cleared current conversation", conversation_id);
            }
        }
        self.store.delete(conversation_id)
    }

    pub fn add_user_message(
        &self,
        text: &str,
        attachments: Vec<FileAttachment>,
    ) -> Result<MessageNode> {
        if text.trim().is_empty() {
            return Err(ChatError::validation("message content cannot be empty"));
        }
        let draft = NodeDraft::new(Role::User, text, None).with_attachments(attachments);
        self.mutate(move |tree| tree.append_to_active(draft))
    }

    /// Append an already generated assistant reply to the active branch.
    pub fn add_assistant_message(
        &self,
        text: &str,
        token_usage: Option<TokenUsage>,
    ) -> Result<MessageNode> {
        let draft = NodeDraft::new(Role::Assistant, text, None)
            .with_model_info(self.provider.model_info())
            .with_parameters(self.provider.parameters())
            .with_token_usage(token_usage);
        let message = self.mutate(move |tree| tree.append_to_active(draft))?;
        self.autosave();
        Ok(message)
    }

    /// Complete the pending user message in one provider call.
    pub fn send_and_get_response(&self) -> Result<MessageNode> {
        let exchange = self.pending_exchange()?;
        log::info!(
            "[{}] Requesting completion for {} ({} context messages)",
            exchange.conversation_id,
            exchange.parent_id,
            exchange.context.len()
        );

        let task = complete_reply(Arc::clone(&self.provider), Arc::clone(&self.tree), exchange);
        let message = self.event_loop.submit(task).wait()??;
        self.autosave();
        Ok(message)
    }

    /// Stream the reply to the pending user message.
    ///
    /// The assistant node is attached and autosaved before the `done` frame
    /// is emitted.
    pub fn stream_response(&self) -> Result<SseStream> {
        let exchange = self.pending_exchange()?;
        let options = StreamOptions {
            item_timeout: self.config.item_timeout(),
            queue_capacity: self.config.queue_capacity,
            label: exchange.conversation_id.clone(),
        };
        log::info!(
            "[{}] Streaming reply to {}",
            exchange.conversation_id,
            exchange.parent_id
        );

        let provider = Arc::clone(&self.provider);
        let tree = Arc::clone(&self.tree);
        let writer = self.config.autosave.then(|| self.writer.clone());
        let context = exchange.context.clone();
        let finish = move |reply: StreamedReply| {
            finish_streamed_reply(provider, tree, writer, exchange, reply)
        };

        let stream = bridge::start_stream(
            &self.event_loop,
            Arc::clone(&self.provider),
            context,
            options,
            finish,
        );
        Ok(stream.track(Arc::clone(&self.active_streams)))
    }

    /// Generate a fresh sibling for an assistant message.
    pub fn retry_message(&self, message_id: &str) -> Result<BranchPosition> {
        let (conversation_id, plan) = self.read(|tree| {
            Ok((
                tree.conversation_id().to_string(),
                tree.prepare_retry(message_id)?,
            ))
        })?;
        log::info!(
            "[{}] Retrying {} under {}",
            conversation_id,
            plan.target_id,
            plan.parent_id
        );

        let task = retry_reply(
            Arc::clone(&self.provider),
            Arc::clone(&self.tree),
            conversation_id,
            plan,
        );
        let position = self.event_loop.submit(task).wait()??;
        self.autosave();
        Ok(position)
    }

    pub fn get_message_siblings(&self, message_id: &str) -> Result<SiblingInfo> {
        self.read(|tree| tree.get_message_siblings(message_id))
    }

    pub fn switch_to_sibling(&self, message_id: &str, direction: Direction) -> Result<BranchPosition> {
        let message_id = message_id.to_string();
        let position = self.mutate(move |tree| tree.switch_to_sibling(&message_id, direction))?;
        self.autosave();
        Ok(position)
    }

    pub fn get_conversation_tree(&self) -> Result<TreeGraph> {
        self.read(|tree| Ok(tree.graph()))
    }

    pub fn get_status(&self) -> ConversationStatus {
        let current = self.tree.read();
        let tree = current.as_ref();
        ConversationStatus {
            conversation_id: tree.map(|t| t.conversation_id().to_string()),
            title: tree.map(|t| t.title().to_string()),
            message_count: tree.map_or(0, ConversationTree::len),
            active_branch_length: tree.map_or(0, |t| t.active_branch().len()),
            active_leaf_id: tree.map(|t| t.active_leaf_id().to_string()),
            model: self.provider.model_info().name,
            data_dir: self.store.base_path().to_path_buf(),
            event_loop_running: self.event_loop.is_running(),
            active_streams: self.active_streams.load(Ordering::SeqCst),
        }
    }

    fn read<R>(&self, op: impl FnOnce(&ConversationTree) -> Result<R>) -> Result<R> {
        let current = self.tree.read();
        let tree = current.as_ref().ok_or_else(no_conversation)?;
        op(tree)
    }

    /// Run a tree mutation as one task on the event loop.
    fn mutate<R, F>(&self, op: F) -> Result<R>
    where
        F: FnOnce(&mut ConversationTree) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let tree = Arc::clone(&self.tree);
        self.event_loop
            .submit(async move {
                let mut current = tree.write();
                let tree = current.as_mut().ok_or_else(no_conversation)?;
                op(tree)
            })
            .wait()?
    }

    /// The active leaf must be a user message awaiting its reply.
    fn pending_exchange(&self) -> Result<PendingExchange> {
        self.read(|tree| {
            let leaf = tree.active_leaf();
            if leaf.role != Role::User {
                return Err(ChatError::validation(
                    "the active branch does not end with a user message",
                ));
            }
            Ok(PendingExchange {
                conversation_id: tree.conversation_id().to_string(),
                parent_id: leaf.id.clone(),
                context: tree.messages_to_root(&leaf.id)?,
            })
        })
    }

    fn autosave(&self) {
        if self.config.autosave {
            self.writer.save_quietly(None);
        }
    }
}

/// Saves the shared tree one write at a time, snapshotting it only after the
/// lock is held, so a file on disk is never replaced by an older state.
#[derive(Clone)]
struct TreeWriter {
    store: ConversationStore,
    tree: SharedTree,
    lock: Arc<Mutex<()>>,
}

impl TreeWriter {
    fn save(&self) -> Result<PathBuf> {
        let _guard = self.lock.lock();
        let snapshot = self.tree.read().clone().ok_or_else(no_conversation)?;
        self.store.save(&snapshot)
    }

    /// Autosave the current tree. With `conversation_id`, nothing is written
    /// unless that conversation is still current.
    fn save_quietly(&self, conversation_id: Option<&str>) {
        let _guard = self.lock.lock();
        let snapshot = match self.tree.read().as_ref() {
            Some(tree) if conversation_id.map_or(true, |id| id == tree.conversation_id()) => {
                tree.clone()
            }
            _ => return,
        };
        self.store.save_quietly(&snapshot);
    }
}

struct PendingExchange {
    conversation_id: String,
    parent_id: String,
    context: Vec<ContextMessage>,
}

fn no_conversation() -> ChatError {
    ChatError::not_found("no conversation is loaded")
}

fn reply_draft(provider: &dyn ProviderClient, text: String) -> NodeDraft {
    NodeDraft::new(Role::Assistant, text, None)
        .with_model_info(provider.model_info())
        .with_parameters(provider.parameters())
}

/// Lock the tree, making sure the conversation was not swapped out while the
/// provider was running.
fn with_current<R>(
    tree: &SharedTree,
    conversation_id: &str,
    op: impl FnOnce(&mut ConversationTree) -> Result<R>,
) -> Result<R> {
    let mut current = tree.write();
    match current.as_mut() {
        Some(tree) if tree.conversation_id() == conversation_id => op(tree),
        _ => Err(ChatError::validation(format!(
            "conversation {conversation_id} is no longer current"
        ))),
    }
}

async fn complete_reply(
    provider: Arc<dyn ProviderClient>,
    tree: SharedTree,
    exchange: PendingExchange,
) -> Result<MessageNode> {
    let completion = provider.complete(&exchange.context).await?;
    let draft = reply_draft(provider.as_ref(), completion.text)
        .with_token_usage(completion.token_usage)
        .with_response_id(completion.response_id);

    with_current(&tree, &exchange.conversation_id, |tree| {
        tree.attach_reply(&exchange.parent_id, draft)
    })
}

async fn retry_reply(
    provider: Arc<dyn ProviderClient>,
    tree: SharedTree,
    conversation_id: String,
    plan: RetryPlan,
) -> Result<BranchPosition> {
    let completion = provider.complete(&plan.context).await?;
    let draft = reply_draft(provider.as_ref(), completion.text)
        .with_token_usage(completion.token_usage)
        .with_response_id(completion.response_id);

    with_current(&tree, &conversation_id, |tree| tree.attach_retry(&plan, draft))
}

async fn finish_streamed_reply(
    provider: Arc<dyn ProviderClient>,
    tree: SharedTree,
    writer: Option<TreeWriter>,
    exchange: PendingExchange,
    reply: StreamedReply,
) -> Result<DoneEvent> {
    let model_info = provider.model_info();
    let draft = reply_draft(provider.as_ref(), reply.text);

    let message = with_current(&tree, &exchange.conversation_id, |tree| {
        let message = tree.attach_reply(&exchange.parent_id, draft)?;
        if reply.token_usage.is_some() {
            tree.record_completion(&message.id, reply.token_usage.clone(), None)?;
        }
        Ok(message)
    })?;

    if let Some(writer) = writer {
        let conversation_id = exchange.conversation_id.clone();
        let saved =
            tokio::task::spawn_blocking(move || writer.save_quietly(Some(&conversation_id))).await;
        if saved.is_err() {
            log::warn!("[{}] Autosave task failed", exchange.conversation_id);
        }
    }

    Ok(DoneEvent {
        done: true,
        conversation_id: exchange.conversation_id,
        message_id: message.id,
        parent_id: Some(exchange.parent_id),
        model: model_info.name,
        token_usage: reply.token_usage,
    })
}
