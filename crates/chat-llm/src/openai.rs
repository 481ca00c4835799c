use async_trait::async_trait;
use chat_core::{ContextMessage, GenerationParameters, ModelInfo, TokenUsage};
use eventsource_stream::Eventsource;
use futures::{stream, StreamExt};
use reqwest::Client;
use serde::Deserialize;

use crate::provider::{ChunkStream, Completion, ProviderClient, ProviderError, Result, StreamChunk};

/// Client for any endpoint speaking the OpenAI chat-completions protocol.
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    parameters: GenerationParameters,
}

impl OpenAIProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            parameters: GenerationParameters::default(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_parameters(mut self, parameters: GenerationParameters) -> Self {
        self.parameters = parameters;
        self
    }

    fn build_request_body(&self, messages: &[ContextMessage], stream: bool) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|message| {
                serde_json::json!({
                    "role": message.role.as_str(),
                    "content": render_content(message),
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
        });
        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        if let Some(temperature) = self.parameters.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let Some(top_p) = self.parameters.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }
        if let Some(max_tokens) = self.parameters.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        log::debug!("Request body messages count: {}", messages.len());
        body
    }

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await?;
            return Err(ProviderError::Api(format!("HTTP {}: {}", status, text)));
        }
        Ok(response)
    }
}

/// Attachments are referenced inline; uploading them is out of scope here.
fn render_content(message: &ContextMessage) -> String {
    if message.attached_files.is_empty() {
        return message.content.clone();
    }
    let mut content = message.content.clone();
    for file in &message.attached_files {
        content.push_str("\n\n[Attached file: ");
        content.push_str(file.name.as_deref().unwrap_or(&file.path));
        content.push(']');
    }
    content
}

#[async_trait]
impl ProviderClient for OpenAIProvider {
    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: Some(self.model.clone()),
            provider: Some("openai".to_string()),
            ..Default::default()
        }
    }

    fn parameters(&self) -> GenerationParameters {
        self.parameters.clone()
    }

    async fn complete(&self, messages: &[ContextMessage]) -> Result<Completion> {
        let body = self.build_request_body(messages, false);
        let response: CompletionResponse = self.post(&body).await?.json().await?;

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::Api("completion contained no choices".to_string()))?;

        Ok(Completion {
            text,
            token_usage: response.usage,
            response_id: response.id,
        })
    }

    async fn stream(&self, messages: &[ContextMessage]) -> Result<ChunkStream> {
        let body = self.build_request_body(messages, true);
        let response = self.post(&body).await?;

        let stream = response
            .bytes_stream()
            .eventsource()
            .take_while(|event| {
                let finished = matches!(event, Ok(event) if event.data.trim() == "[DONE]");
                futures::future::ready(!finished)
            })
            .flat_map(|event| {
                let items: Vec<Result<StreamChunk>> = match event {
                    Ok(event) => match parse_stream_data(&event.data) {
                        Ok(chunks) => chunks.into_iter().map(Ok).collect(),
                        Err(e) => vec![Err(e)],
                    },
                    Err(e) => vec![Err(ProviderError::Stream(e.to_string()))],
                };
                stream::iter(items)
            });

        Ok(Box::pin(stream))
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    id: Option<String>,
    choices: Vec<CompletionChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamEnvelope {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
}

fn parse_stream_data(data: &str) -> Result<Vec<StreamChunk>> {
    if data.trim().is_empty() {
        return Ok(Vec::new());
    }
    let envelope: StreamEnvelope = serde_json::from_str(data)?;

    let mut chunks: Vec<StreamChunk> = envelope
        .choices
        .into_iter()
        .filter_map(|choice| choice.delta.content)
        .filter(|text| !text.is_empty())
        .map(StreamChunk::Text)
        .collect();
    if let Some(usage) = envelope.usage {
        chunks.push(StreamChunk::Usage(usage));
    }
    Ok(chunks)
}
