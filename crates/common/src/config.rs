use std::str::FromStr;

use serde::Deserialize;

/// Default Expo push endpoint.
pub const DEFAULT_EXPO_PUSH_ENDPOINT: &str = "https://exp.host/--/api/v2/push/send";

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string (profile/match lookup cache)
    pub redis_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Seconds between queue sweeps (default: 30)
    pub push_interval_secs: u64,

    /// Maximum number of jobs claimed per sweep (default: 50)
    pub push_sweep_limit: u32,

    /// Maximum number of messages per gateway request (default: 50, Expo allows 100)
    pub push_batch_size: usize,

    /// Attempts after which a job is given up (default: 5)
    pub push_max_attempts: u32,

    /// Jobs processed concurrently within one sweep (default: 8)
    pub push_concurrency: usize,

    /// How long a claimed job stays invisible to other sweeps (default: 300)
    pub push_claim_lease_secs: u64,

    /// Gateway request timeout in milliseconds (default: 10000)
    pub push_gateway_timeout_ms: u64,

    /// Re-address `message_new` jobs that were queued for their own sender (default: true)
    pub push_repair_misaddressed: bool,

    /// Quiet-hours window, e.g. `22-07`. Unset disables quiet hours.
    pub quiet_hours: Option<String>,

    /// UTC offset used to interpret quiet hours, e.g. `+01:00` (default: `+00:00`)
    pub quiet_hours_utc_offset: String,

    /// Expo push endpoint
    pub expo_push_endpoint: String,

    /// Expo access token. Sweeps are skipped while it is missing.
    pub expo_access_token: Option<String>,

    /// Expo project ids whose tokens may receive pushes. Empty disables filtering.
    pub expo_allowed_project_ids: Vec<String>,

    /// TTL of cached profile/match lookups in seconds. 0 disables the cache.
    pub profile_cache_ttl_secs: u64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", 20)?,
            push_interval_secs: parse_var("PUSH_INTERVAL_SECS", 30)?,
            push_sweep_limit: parse_var("PUSH_SWEEP_LIMIT", 50)?,
            push_batch_size: parse_var::<usize>("PUSH_BATCH_SIZE", 50)?.clamp(1, 100),
            push_max_attempts: parse_var("PUSH_MAX_ATTEMPTS", 5)?,
            push_concurrency: parse_var::<usize>("PUSH_CONCURRENCY", 8)?.max(1),
            push_claim_lease_secs: parse_var("PUSH_CLAIM_LEASE_SECS", 300)?,
            push_gateway_timeout_ms: parse_var("PUSH_GATEWAY_TIMEOUT_MS", 10_000)?,
            push_repair_misaddressed: parse_var("PUSH_REPAIR_MISADDRESSED", true)?,
            quiet_hours: non_empty_var("QUIET_HOURS"),
            quiet_hours_utc_offset: std::env::var("QUIET_HOURS_UTC_OFFSET")
                .unwrap_or_else(|_| "+00:00".to_string()),
            expo_push_endpoint: std::env::var("EXPO_PUSH_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_EXPO_PUSH_ENDPOINT.to_string()),
            expo_access_token: non_empty_var("EXPO_PUSH_ACCESS_TOKEN"),
            expo_allowed_project_ids: split_list(
                &std::env::var("EXPO_ALLOWED_PROJECT_IDS").unwrap_or_default(),
            ),
            profile_cache_ttl_secs: parse_var("PROFILE_CACHE_TTL_SECS", 300)?,
        })
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{name} must be a valid {}", std::any::type_name::<T>())),
        _ => Ok(default),
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Split a comma-separated list, dropping blanks.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
