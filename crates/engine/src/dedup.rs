//! Deduplication guard.
//!
//! Rare, high-value events (`match_new`) are deduplicated for the lifetime of
//! the queue; frequent ones (`message_new`, `like_received`) only within a
//! trailing window, which keeps the lookup cheap. Among several pending
//! duplicates, the one earliest in queue order is the one delivered, unless a
//! later one already holds the key.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use herald_common::error::AppError;
use herald_common::types::JobType;

use crate::ingest::DecodedJob;
use crate::repository::{DedupScope, DuplicateQuery, QueueRepository};

/// Trailing window for windowed deduplication.
pub const DEFAULT_DEDUP_WINDOW_MINUTES: i64 = 15;

pub struct DedupGuard {
    queue: Arc<dyn QueueRepository>,
    window: Duration,
}

impl DedupGuard {
    pub fn new(queue: Arc<dyn QueueRepository>) -> Self {
        Self {
            queue,
            window: Duration::minutes(DEFAULT_DEDUP_WINDOW_MINUTES),
        }
    }

    /// The lookup scope for a job type, or `None` when the type is never
    /// deduplicated.
    pub fn scope_for(&self, job_type: JobType, now: DateTime<Utc>) -> Option<DedupScope> {
        match job_type {
            JobType::MatchNew => Some(DedupScope::Lifetime),
            JobType::MessageNew | JobType::LikeReceived => {
                Some(DedupScope::Since(now - self.window))
            }
            JobType::TestPush => None,
        }
    }

    pub async fn should_skip(&self, job: &DecodedJob, now: DateTime<Utc>) -> Result<bool, AppError> {
        let Some(scope) = self.scope_for(job.job_type(), now) else {
            return Ok(false);
        };
        let Some(dedup_key) = job.dedup_key() else {
            return Ok(false);
        };

        let query = DuplicateQuery {
            job_id: job.row.id,
            user_id: job.row.user_id,
            dedup_key,
            scheduled_at: job.row.scheduled_at,
            scope,
        };
        let duplicate = !self.queue.reserve_dedup_key(&query).await?;

        if duplicate {
            tracing::info!(
                job_id = job.row.id,
                user_id = %job.row.user_id,
                dedup_key = %query.dedup_key,
                "Push suppressed as duplicate"
            );
        }
        Ok(duplicate)
    }
}
