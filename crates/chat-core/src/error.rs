use std::time::Duration;

use thiserror::Error;

use crate::navigator::Direction;

/// Errors raised by conversation tree operations.
///
/// The route layer maps each variant to a status code; inside a live stream
/// every variant collapses into a single `{"error": ...}` event.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cannot move {direction} from sibling {index} of {total}")]
    Bounds {
        direction: Direction,
        index: usize,
        total: usize,
    },

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("No stream item received within {}s", .0.as_secs_f64())]
    StreamTimeout(Duration),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Event loop unavailable: {0}")]
    EventLoop(String),
}

impl ChatError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
