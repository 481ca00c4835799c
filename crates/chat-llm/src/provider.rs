use std::pin::Pin;

use async_trait::async_trait;
use chat_core::{ChatError, ContextMessage, GenerationParameters, ModelInfo, TokenUsage};
use futures::Stream;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("API error: {0}")]
    Api(String),
}

impl From<ProviderError> for ChatError {
    fn from(error: ProviderError) -> Self {
        ChatError::Provider(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// One item of a streamed completion.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Text(String),
    /// Final usage report; providers send it once, after the last text chunk.
    Usage(TokenUsage),
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub text: String,
    pub token_usage: Option<TokenUsage>,
    pub response_id: Option<String>,
}

/// A chat-completion backend. Wire formats, keys and retries are the
/// implementation's business; the engine only sees text and usage.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Model details recorded on every assistant node this client produces.
    fn model_info(&self) -> ModelInfo;

    fn parameters(&self) -> GenerationParameters {
        GenerationParameters::default()
    }

    async fn complete(&self, messages: &[ContextMessage]) -> Result<Completion>;

    async fn stream(&self, messages: &[ContextMessage]) -> Result<ChunkStream>;
}
