use actix_web::{web, HttpResponse};

use crate::error::ApiError;
use crate::state::AppState;

/// Graph view of the current conversation. Reads do not go through the loop.
pub async fn handler(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let graph = state.facade.get_conversation_tree()?;
    Ok(HttpResponse::Ok().json(graph))
}
