pub mod config;
pub mod db;
pub mod errors;
pub mod llm;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod streams;
pub mod types;

use std::sync::Arc;

use actix_web::web;
use sqlx::SqlitePool;

use config::AppConfig;
use llm::ModelClient;
use streams::StreamManager;

/// Process-wide dependencies. Per-request state (the principal) never lives
/// here; it is resolved fresh by the extractors on every call.
pub struct AppState {
    pub pool: SqlitePool,
    pub config: AppConfig,
    pub model: Arc<dyn ModelClient>,
    pub streams: StreamManager,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(routes::auth::get_user);
    cfg.service(routes::auth::get_session);
    cfg.service(routes::models::list_models);
    cfg.service(
        web::scope("/conversations")
            .service(routes::conversations::list_conversations)
            .service(routes::conversations::create_conversation)
            .service(routes::chat::post_turn)
            .service(routes::chat::resume_stream)
            .service(routes::conversations::update_model)
            .service(routes::conversations::get_conversation)
            .service(routes::conversations::delete_conversation),
    );
}
