//! Producer/consumer bridge between an async provider stream running on the
//! event loop and a synchronous consumer iterating SSE frames.
//!
//! The producer pushes [`StreamItem`]s into a bounded queue and always ends
//! with a sentinel, however it exits. The consumer dequeues one item at a
//! time with a per-item deadline and stops after the first terminal frame.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chat_core::{ChatError, ContextMessage, Result, TokenUsage};
use chat_llm::{ProviderClient, StreamChunk};
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};

use super::event_loop::{EventLoop, Submitted};
use super::sse::{DoneEvent, SseEvent};

#[derive(Debug)]
pub(crate) enum StreamItem {
    Chunk(String),
    Done(DoneEvent),
    Error(String),
    /// End of production. Never forwarded to the client.
    Sentinel,
}

/// Everything the provider produced for one streamed reply.
#[derive(Debug, Clone, Default)]
pub struct StreamedReply {
    pub text: String,
    pub token_usage: Option<TokenUsage>,
    pub chunk_count: usize,
}

#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub item_timeout: Duration,
    pub queue_capacity: usize,
    /// Prefix for log lines, usually the conversation id.
    pub label: String,
}

/// Pushes the sentinel when the producer exits, including on cancellation.
struct SentinelGuard {
    tx: mpsc::Sender<StreamItem>,
}

impl Drop for SentinelGuard {
    fn drop(&mut self) {
        let _ = self.tx.try_send(StreamItem::Sentinel);
    }
}

/// Start producing on `event_loop` and return the consumer side.
///
/// `finish` runs on the loop once the provider stream is exhausted; its
/// `DoneEvent` becomes the final frame. A failure anywhere becomes a single
/// error frame instead.
pub fn start_stream<F, Fut>(
    event_loop: &Arc<EventLoop>,
    provider: Arc<dyn ProviderClient>,
    messages: Vec<ContextMessage>,
    options: StreamOptions,
    finish: F,
) -> SseStream
where
    F: FnOnce(StreamedReply) -> Fut + Send + 'static,
    Fut: Future<Output = Result<DoneEvent>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(options.queue_capacity.max(1));
    let label = options.label.clone();
    let producer = event_loop.submit(produce(provider, messages, tx, label, finish));

    log::debug!("[{}] Stream producer scheduled", options.label);
    SseStream {
        event_loop: Arc::clone(event_loop),
        queue: Arc::new(Mutex::new(rx)),
        producer,
        item_timeout: options.item_timeout,
        label: options.label,
        finished: false,
        chunks: 0,
        active: None,
    }
}

async fn produce<F, Fut>(
    provider: Arc<dyn ProviderClient>,
    messages: Vec<ContextMessage>,
    tx: mpsc::Sender<StreamItem>,
    label: String,
    finish: F,
) where
    F: FnOnce(StreamedReply) -> Fut,
    Fut: Future<Output = Result<DoneEvent>>,
{
    let _sentinel = SentinelGuard { tx: tx.clone() };

    let last = match relay_chunks(provider.as_ref(), &messages, &tx).await {
        Ok(Some(reply)) => {
            log::debug!("[{}] Provider stream finished after {} chunks", label, reply.chunk_count);
            match finish(reply).await {
                Ok(done) => StreamItem::Done(done),
                Err(e) => {
                    log::error!("[{}] Failed to record streamed reply: {}", label, e);
                    StreamItem::Error(e.to_string())
                }
            }
        }
        Ok(None) => {
            log::debug!("[{}] Consumer went away, stopping producer", label);
            return;
        }
        Err(e) => {
            log::error!("[{}] Provider stream failed: {}", label, e);
            StreamItem::Error(e.to_string())
        }
    };

    let _ = tx.send(last).await;
}

/// Forward text chunks to the queue. `Ok(None)` means the consumer is gone.
async fn relay_chunks(
    provider: &dyn ProviderClient,
    messages: &[ContextMessage],
    tx: &mpsc::Sender<StreamItem>,
) -> Result<Option<StreamedReply>> {
    let mut stream = provider.stream(messages).await?;
    let mut reply = StreamedReply::default();

    while let Some(item) = stream.next().await {
        match item? {
            StreamChunk::Text(text) if text.is_empty() => {}
            StreamChunk::Text(text) => {
                reply.text.push_str(&text);
                reply.chunk_count += 1;
                if tx.send(StreamItem::Chunk(text)).await.is_err() {
                    return Ok(None);
                }
            }
            StreamChunk::Usage(usage) => reply.token_usage = Some(usage),
        }
    }

    Ok(Some(reply))
}

/// Synchronous consumer of a streamed reply.
///
/// Iterating yields SSE frames: any number of chunks, then at most one
/// `done` or `error` frame. Dropping the stream cancels the producer.
pub struct SseStream {
    event_loop: Arc<EventLoop>,
    queue: Arc<Mutex<mpsc::Receiver<StreamItem>>>,
    producer: Submitted<()>,
    item_timeout: Duration,
    label: String,
    finished: bool,
    chunks: usize,
    active: Option<Arc<AtomicUsize>>,
}

impl SseStream {
    /// Count this stream in `counter` until it finishes.
    pub fn track(mut self, counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        self.active = Some(counter);
        self
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn next_event(&mut self) -> Option<SseEvent> {
        if self.finished {
            return None;
        }

        let queue = Arc::clone(&self.queue);
        let pending = self
            .event_loop
            .submit(async move { queue.lock().await.recv().await });

        match pending.wait_timeout(self.item_timeout) {
            Ok(Some(StreamItem::Chunk(chunk))) => {
                self.chunks += 1;
                Some(SseEvent::Chunk { chunk })
            }
            Ok(Some(StreamItem::Done(done))) => {
                self.finish("done");
                Some(SseEvent::Done(done))
            }
            Ok(Some(StreamItem::Error(error))) => {
                self.finish("error");
                Some(SseEvent::Error { error })
            }
            Ok(Some(StreamItem::Sentinel)) | Ok(None) => {
                self.finish("end of production");
                None
            }
            Err(e @ ChatError::StreamTimeout(_)) => {
                pending.cancel();
                log::warn!("[{}] {}", self.label, e);
                self.finish("timeout");
                Some(SseEvent::error(e.to_string()))
            }
            Err(e) => {
                pending.cancel();
                log::error!("[{}] Stream bridge failed: {}", self.label, e);
                self.finish("bridge failure");
                Some(SseEvent::error(e.to_string()))
            }
        }
    }

    fn finish(&mut self, reason: &str) {
        if self.finished {
            return;
        }
        self.finished = true;

        if !self.producer.is_finished() {
            self.producer.cancel();
        }
        if let Some(counter) = self.active.take() {
            counter.fetch_sub(1, Ordering::SeqCst);
        }
        log::debug!(
            "[{}] Stream closed ({}) after {} chunks",
            self.label,
            reason,
            self.chunks
        );
    }
}

impl Iterator for SseStream {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.next_event().map(|event| event.to_frame())
    }
}

impl Drop for SseStream {
    fn drop(&mut self) {
        self.finish("dropped");
    }
}
