use actix_web::error::BlockingError;
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use chat_core::ChatError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error("Blocking task failed: {0}")]
    Blocking(String),
}

impl From<BlockingError> for ApiError {
    fn from(error: BlockingError) -> Self {
        ApiError::Blocking(error.to_string())
    }
}

#[derive(Serialize)]
struct JsonError {
    message: String,
    r#type: &'static str,
}

#[derive(Serialize)]
struct JsonErrorWrapper {
    error: JsonError,
}

impl ApiError {
    fn kind(&self) -> &'static str {
        match self {
            ApiError::Chat(ChatError::Validation(_)) => "validation_error",
            ApiError::Chat(ChatError::NotFound(_)) => "not_found",
            ApiError::Chat(ChatError::Bounds { .. }) => "bounds_error",
            ApiError::Chat(ChatError::Provider(_)) => "provider_error",
            ApiError::Chat(ChatError::StreamTimeout(_)) => "stream_timeout",
            ApiError::Chat(ChatError::Persistence(_)) => "persistence_error",
            ApiError::Chat(ChatError::EventLoop(_)) => "event_loop_error",
            ApiError::Blocking(_) => "internal_error",
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Chat(ChatError::Validation(_)) | ApiError::Chat(ChatError::Bounds { .. }) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Chat(ChatError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Chat(ChatError::Provider(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Chat(ChatError::StreamTimeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Chat(ChatError::Persistence(_))
            | ApiError::Chat(ChatError::EventLoop(_))
            | ApiError::Blocking(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();
        if status_code.is_server_error() {
            log::error!("Request failed: {}", self);
        }
        HttpResponse::build(status_code).json(JsonErrorWrapper {
            error: JsonError {
                message: self.to_string(),
                r#type: self.kind(),
            },
        })
    }
}
