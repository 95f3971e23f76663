use std::sync::Arc;
use std::time::Duration;

use herald_common::config::AppConfig;
use herald_common::{db, redis_pool};
use herald_engine::cache::CachedDirectory;
use herald_engine::postgres::{PgDirectory, PgQueueRepository, PgTokenRepository};
use herald_engine::quiet_hours::QuietHours;
use herald_engine::repository::{MatchReader, ProfileReader};
use herald_engine::tokens::TokenRegistry;
use herald_engine::{NotificationQueueProcessor, ProcessorConfig, SweepScheduler};
use herald_notifier::ExpoGateway;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "herald_worker=info,herald_engine=info,herald_notifier=info".into()
            }),
        )
        .json()
        .init();

    tracing::info!("Herald push worker starting...");

    let config = AppConfig::from_env()?;

    let pool = db::create_pool(&config).await?;

    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    let directory = PgDirectory::new(pool.clone());
    let (profiles, matches): (Arc<dyn ProfileReader>, Arc<dyn MatchReader>) =
        if config.profile_cache_ttl_secs > 0 {
            let redis = redis_pool::create_redis_pool(&config.redis_url).await?;
            let cached = Arc::new(CachedDirectory::new(
                directory,
                redis,
                Duration::from_secs(config.profile_cache_ttl_secs),
            ));
            tracing::info!(
                ttl_secs = config.profile_cache_ttl_secs,
                "Profile and match lookups cached in Redis"
            );
            (
                cached.clone() as Arc<dyn ProfileReader>,
                cached as Arc<dyn MatchReader>,
            )
        } else {
            let direct = Arc::new(directory);
            (
                direct.clone() as Arc<dyn ProfileReader>,
                direct as Arc<dyn MatchReader>,
            )
        };

    let gateway = ExpoGateway::new(
        config.expo_push_endpoint.clone(),
        config.expo_access_token.clone(),
        Duration::from_millis(config.push_gateway_timeout_ms),
    )?;
    if config.expo_access_token.is_none() {
        tracing::warn!("EXPO_PUSH_ACCESS_TOKEN is not set, sweeps will be skipped");
    }

    let tokens = TokenRegistry::new(
        Arc::new(PgTokenRepository::new(pool.clone())),
        config.expo_allowed_project_ids.clone(),
        config.push_batch_size,
    );

    let processor = NotificationQueueProcessor::new(
        ProcessorConfig::from_app_config(&config),
        Arc::new(PgQueueRepository::new(pool)),
        tokens,
        profiles,
        matches,
        Arc::new(gateway),
        QuietHours::from_config(config.quiet_hours.as_deref(), &config.quiet_hours_utc_offset),
    );

    let scheduler = SweepScheduler::new(processor, config.push_interval_secs);
    let (stop, shutdown) = watch::channel(false);
    let sweeps = tokio::spawn(async move { scheduler.run(shutdown).await });

    // Shutdown is honored between sweeps
    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal, finishing the running sweep...");
    let _ = stop.send(true);
    sweeps.await?;

    tracing::info!("Herald push worker stopped.");
    Ok(())
}
