use chat_core::TokenUsage;
use serde::{Deserialize, Serialize};

/// Final frame of a successful stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoneEvent {
    pub done: bool,
    pub conversation_id: String,
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
}

/// One `data:` frame of the client-facing event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SseEvent {
    Chunk { chunk: String },
    Done(DoneEvent),
    Error { error: String },
}

impl SseEvent {
    pub fn chunk(text: impl Into<String>) -> Self {
        SseEvent::Chunk { chunk: text.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        SseEvent::Error {
            error: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SseEvent::Chunk { .. })
    }

    pub fn to_frame(&self) -> String {
        let payload = serde_json::to_string(self).unwrap_or_else(|e| {
            log::error!("Failed to encode stream event: {}", e);
            r#"{"error":"failed to encode stream event"}"#.to_string()
        });
        format!("data: {}\n\n", payload)
    }

    /// Parse a single `data: {...}` frame back into an event.
    pub fn from_frame(frame: &str) -> Option<Self> {
        let payload = frame.trim().strip_prefix("data:")?.trim();
        serde_json::from_str(payload).ok()
    }
}
