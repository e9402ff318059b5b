use anyhow::anyhow;
use std::time::Duration;

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_url: String,
    pub jwt_secret: String,
    pub openrouter_api_key: String,
    /// When set, stream buffers live in Redis and survive process restarts.
    pub redis_url: Option<String>,
    /// How long an unconsumed stream buffer is kept around for resumption.
    pub stream_ttl: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        let jwt_secret =
            std::env::var("JWT_SECRET").map_err(|_| anyhow!("JWT_SECRET not found"))?;

        let openrouter_api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| anyhow!("OPENROUTER_API_KEY not found"))?;

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://everstream.db?mode=rwc".to_string());

        let bind_addr =
            std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());

        let redis_url = std::env::var("REDIS_URL").ok();

        let stream_ttl = std::env::var("STREAM_TTL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map_or(Duration::from_secs(300), Duration::from_secs);

        Ok(AppConfig {
            bind_addr,
            database_url,
            jwt_secret,
            openrouter_api_key,
            redis_url,
            stream_ttl,
        })
    }
}
