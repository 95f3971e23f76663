use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::config::AppConfig;

/// Connect the PostgreSQL pool shared by the queue, token and directory
/// repositories. Sized by `DB_MAX_CONNECTIONS`.
pub async fn create_pool(config: &AppConfig) -> anyhow::Result<PgPool> {
    let max_connections = config.db_max_connections.max(1);
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database_url)
        .await?;

    tracing::info!(max_connections, "Connected to PostgreSQL");
    Ok(pool)
}
