use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CreateConversationRequest {
    #[serde(default)]
    pub title: String,
}

pub async fn create(
    state: web::Data<AppState>,
    body: Option<web::Json<CreateConversationRequest>>,
) -> Result<HttpResponse, ApiError> {
    let title = body.map(|b| b.into_inner().title).unwrap_or_default();
    let facade = state.facade.clone();

    let status = web::block(move || {
        facade.new_conversation(&title)?;
        Ok::<_, chat_core::ChatError>(facade.get_status())
    })
    .await??;

    Ok(HttpResponse::Created().json(status))
}

pub async fn list(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let facade = state.facade.clone();
    let conversations = web::block(move || facade.list_conversations()).await??;
    Ok(HttpResponse::Ok().json(conversations))
}

pub async fn load(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let conversation_id = path.into_inner();
    let facade = state.facade.clone();
    let status = web::block(move || facade.load_conversation(&conversation_id)).await??;
    Ok(HttpResponse::Ok().json(status))
}

pub async fn save(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let facade = state.facade.clone();
    let path = web::block(move || facade.save_conversation()).await??;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "path": path })))
}

pub async fn delete(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let conversation_id = path.into_inner();
    let facade = state.facade.clone();
    let id = conversation_id.clone();
    let deleted = web::block(move || facade.delete_conversation(&id)).await??;

    if deleted {
        log::info!("[{}] Conversation deleted", conversation_id);
        return Ok(HttpResponse::Ok().finish());
    }
    Err(chat_core::ChatError::not_found(format!("conversation {conversation_id}")).into())
}
