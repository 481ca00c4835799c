//! `chat-engine` connects the conversation tree to a provider: a single
//! event-loop thread runs provider calls and tree mutations, and
//! [`ConversationFacade`] exposes them to synchronous callers, including a
//! cancellable SSE stream.

pub mod bridge;
pub mod config;
pub mod conversation;

pub use bridge::{DoneEvent, EventLoop, SseEvent, SseStream};
pub use config::EngineConfig;
pub use conversation::{ConversationFacade, ConversationStatus};
