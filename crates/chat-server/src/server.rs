use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use std::io;

use chat_engine::{bridge, EngineConfig};

use crate::handlers;
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub llm_base_url: String,
    pub model: String,
    pub api_key: String,
    pub engine: EngineConfig,
}

/// Routes under `/api/v1`; shared by the binary and the HTTP tests.
pub fn app_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route(
                "/conversations",
                web::post().to(handlers::conversations::create),
            )
            .route("/conversations", web::get().to(handlers::conversations::list))
            .route(
                "/conversations/save",
                web::post().to(handlers::conversations::save),
            )
            .route(
                "/conversations/{id}/load",
                web::post().to(handlers::conversations::load),
            )
            .route(
                "/conversations/{id}",
                web::delete().to(handlers::conversations::delete),
            )
            .route("/messages", web::post().to(handlers::messages::add))
            .route("/messages/send", web::post().to(handlers::messages::send))
            .route("/messages/stream", web::get().to(handlers::stream::handler))
            .route(
                "/messages/{id}/retry",
                web::post().to(handlers::messages::retry),
            )
            .route(
                "/messages/{id}/siblings",
                web::get().to(handlers::messages::siblings),
            )
            .route(
                "/messages/{id}/switch",
                web::post().to(handlers::messages::switch),
            )
            .route("/tree", web::get().to(handlers::tree::handler))
            .route("/status", web::get().to(handlers::status::status))
            .route("/health", web::get().to(handlers::status::health)),
    );
}

pub async fn run_server(config: ServerConfig) -> io::Result<()> {
    log::info!(
        "Initializing server with base URL: {}, model: {}",
        config.llm_base_url,
        config.model
    );
    let state = AppState::from_config(&config).map_err(io::Error::other)?;
    let state = web::Data::new(state);

    let result = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Cors::permissive())
            .configure(app_config)
    })
    .bind(("0.0.0.0", config.port))?
    .run()
    .await;

    bridge::shutdown_shared();
    log::info!("Server stopped");
    result
}
