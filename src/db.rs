use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

/// Open the conversation store and bring the schema up to date.
///
/// Foreign keys must be switched on per-connection in SQLite; the cascade
/// delete from conversation to message depends on it.
pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    MIGRATOR.run(&pool).await?;
    info!("database ready at {database_url}");
    Ok(pool)
}

/// In-memory store for the test suite. A single connection is pinned for the
/// pool's lifetime because every `sqlite::memory:` connection is its own
/// database.
pub async fn connect_in_memory() -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    MIGRATOR.run(&pool).await?;
    Ok(pool)
}
