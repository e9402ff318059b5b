use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use everstream::config::AppConfig;
use everstream::llm::{ModelClient, OpenRouterClient};
use everstream::streams::{MemoryStreamBroker, RedisStreamBroker, StreamBroker, StreamManager};
use everstream::{configure_routes, db, AppState};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env()?;
    let pool = db::connect(&config.database_url).await?;

    let broker: Arc<dyn StreamBroker> = match &config.redis_url {
        Some(url) => Arc::new(RedisStreamBroker::connect(url, config.stream_ttl).await?),
        None => {
            info!("REDIS_URL not set, stream buffers are in-memory and per-instance");
            Arc::new(MemoryStreamBroker::new(config.stream_ttl))
        }
    };

    let model: Arc<dyn ModelClient> = Arc::new(OpenRouterClient::new(&config.openrouter_api_key));
    let state = web::Data::new(AppState {
        streams: StreamManager::new(pool.clone(), broker),
        pool,
        config: config.clone(),
        model,
    });

    info!("listening on {}", config.bind_addr);
    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(state.clone())
            .configure(configure_routes)
    })
    .bind(&config.bind_addr)?
    .run()
    .await?;

    Ok(())
}
