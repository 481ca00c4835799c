#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chat_core::{ContextMessage, ModelInfo, TokenUsage};
use chat_engine::{ConversationFacade, EngineConfig, EventLoop};
use chat_llm::{ChunkStream, Completion, ProviderClient, ProviderError, StreamChunk};
use futures::stream;
use parking_lot::Mutex;
use tempfile::TempDir;

pub const MODEL: &str = "scripted-model";

/// Sets its flag when dropped; lets tests see that a stream was torn down.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Provider returning canned completions and chunk scripts.
#[derive(Default)]
pub struct ScriptedProvider {
    completions: Mutex<VecDeque<String>>,
    chunks: Vec<String>,
    usage: Option<TokenUsage>,
    chunk_delay: Option<Duration>,
    stall_after: Option<usize>,
    fail_stream: Option<String>,
    fail_complete: Option<String>,
    pub stream_dropped: Arc<AtomicBool>,
    pub calls: AtomicUsize,
    pub last_context: Mutex<Vec<ContextMessage>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_completions(self, texts: &[&str]) -> Self {
        *self.completions.lock() = texts.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_chunks(mut self, chunks: &[&str]) -> Self {
        self.chunks = chunks.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Emit `n` chunks, then never produce anything again.
    pub fn stalling_after(mut self, n: usize) -> Self {
        self.stall_after = Some(n);
        self
    }

    pub fn failing_stream(mut self, message: &str) -> Self {
        self.fail_stream = Some(message.to_string());
        self
    }

    pub fn failing_complete(mut self, message: &str) -> Self {
        self.fail_complete = Some(message.to_string());
        self
    }
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    fn model_info(&self) -> ModelInfo {
        ModelInfo::named(MODEL)
    }

    async fn complete(&self, messages: &[ContextMessage]) -> chat_llm::Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_context.lock() = messages.to_vec();
        if let Some(message) = &self.fail_complete {
            return Err(ProviderError::Api(message.clone()));
        }
        let text = self
            .completions
            .lock()
            .pop_front()
            .unwrap_or_else(|| "scripted reply".to_string());
        Ok(Completion {
            text,
            token_usage: self.usage.clone(),
            response_id: Some("resp-scripted".to_string()),
        })
    }

    async fn stream(&self, messages: &[ContextMessage]) -> chat_llm::Result<ChunkStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_context.lock() = messages.to_vec();

        let chunks = self.chunks.clone();
        let usage = self.usage.clone();
        let delay = self.chunk_delay;
        let stall_after = self.stall_after;
        let fail = self.fail_stream.clone();
        let flag = DropFlag(Arc::clone(&self.stream_dropped));

        let items = async_stream(chunks, usage, delay, stall_after, fail, flag);
        Ok(Box::pin(items))
    }
}

fn async_stream(
    chunks: Vec<String>,
    usage: Option<TokenUsage>,
    delay: Option<Duration>,
    stall_after: Option<usize>,
    fail: Option<String>,
    flag: DropFlag,
) -> impl futures::Stream<Item = chat_llm::Result<StreamChunk>> + Send {
    let state = (chunks.into_iter().enumerate(), usage, fail, flag, false);
    stream::unfold(state, move |(mut iter, mut usage, mut fail, flag, done)| async move {
        if done {
            return None;
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match iter.next() {
            Some((index, _)) if stall_after.is_some_and(|n| index >= n) => {
                std::future::pending::<()>().await;
                None
            }
            Some((_, chunk)) => Some((
                Ok(StreamChunk::Text(chunk)),
                (iter, usage, fail, flag, false),
            )),
            None => {
                if let Some(message) = fail.take() {
                    return Some((
                        Err(ProviderError::Stream(message)),
                        (iter, usage, fail, flag, true),
                    ));
                }
                if stall_after.is_some() {
                    std::future::pending::<()>().await;
                }
                let usage = usage.take()?;
                Some((Ok(StreamChunk::Usage(usage)), (iter, None, fail, flag, true)))
            }
        }
    })
}

/// A facade over a private event loop and a temporary data directory.
pub struct Harness {
    pub facade: ConversationFacade,
    pub provider: Arc<ScriptedProvider>,
    pub dir: TempDir,
}

pub fn harness(provider: ScriptedProvider) -> Harness {
    harness_with(provider, |config| config)
}

pub fn harness_with(
    provider: ScriptedProvider,
    configure: impl FnOnce(EngineConfig) -> EngineConfig,
) -> Harness {
    let dir = TempDir::new().unwrap();
    let config = configure(EngineConfig::default().with_data_dir(dir.path()));
    let provider = Arc::new(provider);
    let event_loop = Arc::new(EventLoop::start().unwrap());
    let facade = ConversationFacade::with_event_loop(
        Arc::clone(&provider) as Arc<dyn ProviderClient>,
        config,
        event_loop,
    )
    .unwrap();
    Harness {
        facade,
        provider,
        dir,
    }
}

/// Strip the `data: ` prefix and parse the JSON payload of a frame.
pub fn frame_json(frame: &str) -> serde_json::Value {
    assert!(frame.starts_with("data: "), "bad frame: {frame:?}");
    assert!(frame.ends_with("\n\n"), "bad frame: {frame:?}");
    serde_json::from_str(frame.trim_start_matches("data: ").trim()).unwrap()
}
