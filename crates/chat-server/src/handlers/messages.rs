use actix_web::{web, HttpResponse};
use chat_core::{ChatError, Direction, FileAttachment, Role, TokenUsage};
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AddMessageRequest {
    pub content: String,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub attachments: Vec<FileAttachment>,
    /// Only meaningful for assistant messages supplied by the caller.
    #[serde(default)]
    pub token_usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
pub struct SwitchRequest {
    /// `prev`, `next` or `none`; a missing value is rejected like any other.
    #[serde(default)]
    pub direction: String,
}

pub async fn add(
    state: web::Data<AppState>,
    body: web::Json<AddMessageRequest>,
) -> Result<HttpResponse, ApiError> {
    let request = body.into_inner();
    let facade = state.facade.clone();

    let message = web::block(move || match request.role.unwrap_or(Role::User) {
        Role::User => facade.add_user_message(&request.content, request.attachments),
        Role::Assistant => facade.add_assistant_message(&request.content, request.token_usage),
        other => Err(ChatError::validation(format!(
            "cannot add a {other} message"
        ))),
    })
    .await??;

    Ok(HttpResponse::Created().json(message))
}

pub async fn send(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let facade = state.facade.clone();
    let message = web::block(move || facade.send_and_get_response()).await??;
    Ok(HttpResponse::Ok().json(message))
}

pub async fn retry(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let message_id = path.into_inner();
    let facade = state.facade.clone();
    let position = web::block(move || facade.retry_message(&message_id)).await??;
    Ok(HttpResponse::Ok().json(position))
}

pub async fn siblings(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let siblings = state.facade.get_message_siblings(&path.into_inner())?;
    Ok(HttpResponse::Ok().json(siblings))
}

pub async fn switch(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<SwitchRequest>,
) -> Result<HttpResponse, ApiError> {
    let message_id = path.into_inner();
    let direction: Direction = body.direction.parse()?;
    let facade = state.facade.clone();

    let position =
        web::block(move || facade.switch_to_sibling(&message_id, direction)).await??;
    Ok(HttpResponse::Ok().json(position))
}
