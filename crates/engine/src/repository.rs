//! Storage and lookup seams of the delivery engine.
//!
//! The processor only sees these traits; [`crate::postgres`] provides the
//! production implementations and [`crate::cache`] a Redis-backed lookup cache.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::{
    DeviceToken, JobOutcome, MatchParticipants, NewJob, NotificationJob, ProfileMeta,
};

/// How far back delivered jobs count as duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupScope {
    /// Any delivered job, ever.
    Lifetime,
    /// Jobs delivered at or after the given instant.
    Since(DateTime<Utc>),
}

/// Identifies a claimed job competing for a dedup key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateQuery {
    pub job_id: i64,
    pub user_id: Uuid,
    pub dedup_key: String,
    /// Position of the job in queue order; pending jobs ahead of it win.
    pub scheduled_at: DateTime<Utc>,
    pub scope: DedupScope,
}

/// Durable queue of notification jobs.
#[async_trait]
pub trait QueueRepository: Send + Sync {
    /// Atomically select and claim up to `limit` due, unclaimed jobs, oldest
    /// `scheduled_at` first. Claimed jobs are invisible to other sweeps until
    /// finalized or until `lease` elapses.
    async fn claim_pending(
        &self,
        limit: u32,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Vec<NotificationJob>, AppError>;

    /// Persist the normalized dedup key of claimed jobs.
    async fn tag_dedup_keys(&self, keys: &[(i64, String)]) -> Result<(), AppError>;

    /// Write the outcome of a claimed job and release the claim.
    ///
    /// Fails with `AppError::ClaimLost` when the job is no longer held under
    /// `job.claim_token`.
    async fn apply(&self, job: &NotificationJob, outcome: JobOutcome) -> Result<(), AppError>;

    /// Enqueue a job produced by the engine.
    async fn insert(&self, job: NewJob) -> Result<i64, AppError>;

    /// Atomically check `query.job_id` against other jobs under the same key
    /// and, if none makes it a duplicate, record it as the key's in-flight
    /// holder. Returns `false` for a duplicate.
    ///
    /// Another job wins when it was delivered within `query.scope`, is still
    /// pending ahead of this one in queue order, or already holds the key.
    async fn reserve_dedup_key(&self, query: &DuplicateQuery) -> Result<bool, AppError>;

    /// Whether any job, in any state, exists for `user_id` under `dedup_key`.
    async fn exists_for_key(&self, user_id: Uuid, dedup_key: &str) -> Result<bool, AppError>;
}

/// Registered device tokens.
#[async_trait]
pub trait TokenRepository: Send + Sync {
    async fn select_by_user(&self, user_id: Uuid) -> Result<Vec<DeviceToken>, AppError>;

    /// Remove tokens; returns how many rows were deleted.
    async fn delete_by_tokens(&self, tokens: &[String]) -> Result<u64, AppError>;
}

/// Read-only profile lookups.
#[async_trait]
pub trait ProfileReader: Send + Sync {
    async fn profile_meta(&self, user_id: Uuid) -> Result<Option<ProfileMeta>, AppError>;
}

/// Read-only match lookups.
#[async_trait]
pub trait MatchReader: Send + Sync {
    async fn match_participants(&self, match_id: &str)
    -> Result<Option<MatchParticipants>, AppError>;
}
