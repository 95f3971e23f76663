//! PostgreSQL implementations of the repository traits.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::{
    DeviceToken, JobOutcome, MatchParticipants, NewJob, NotificationJob, ProfileMeta,
};

use crate::repository::{
    DedupScope, DuplicateQuery, MatchReader, ProfileReader, QueueRepository, TokenRepository,
};

/// `push_queue` backed job queue.
#[derive(Clone)]
pub struct PgQueueRepository {
    pool: PgPool,
}

impl PgQueueRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueRepository for PgQueueRepository {
    async fn claim_pending(
        &self,
        limit: u32,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Vec<NotificationJob>, AppError> {
        let claim_token = Uuid::new_v4();

        // SKIP LOCKED keeps overlapping sweeps from blocking on, or taking,
        // rows another sweep is claiming in the same instant.
        let mut jobs: Vec<NotificationJob> = sqlx::query_as(
            r#"
            UPDATE push_queue q
            SET claim_token = $1,
                claimed_until = $2 + make_interval(secs => $3)
            FROM (
                SELECT id
                FROM push_queue
                WHERE processed_at IS NULL
                  AND scheduled_at <= $2
                  AND (claimed_until IS NULL OR claimed_until < $2)
                ORDER BY scheduled_at ASC, id ASC
                LIMIT $4
                FOR UPDATE SKIP LOCKED
            ) due
            WHERE q.id = due.id
            RETURNING q.id, q.user_id, q.type, q.payload, q.scheduled_at, q.attempts, q.claim_token
            "#,
        )
        .bind(claim_token)
        .bind(now)
        .bind(lease.as_secs_f64())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        // RETURNING does not preserve the subquery order.
        jobs.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at).then(a.id.cmp(&b.id)));

        if !jobs.is_empty() {
            tracing::debug!(claim_token = %claim_token, jobs = jobs.len(), "Claimed push jobs");
        }
        Ok(jobs)
    }

    async fn tag_dedup_keys(&self, keys: &[(i64, String)]) -> Result<(), AppError> {
        if keys.is_empty() {
            return Ok(());
        }
        let (ids, values): (Vec<i64>, Vec<String>) = keys.iter().cloned().unzip();

        sqlx::query(
            r#"
            UPDATE push_queue q
            SET dedup_key = k.dedup_key
            FROM UNNEST($1::bigint[], $2::text[]) AS k(id, dedup_key)
            WHERE q.id = k.id
            "#,
        )
        .bind(&ids)
        .bind(&values)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn apply(&self, job: &NotificationJob, outcome: JobOutcome) -> Result<(), AppError> {
        let query = match outcome {
            JobOutcome::Deferred { until } => sqlx::query(
                r#"
                UPDATE push_queue
                SET scheduled_at = $3, claim_token = NULL, claimed_until = NULL,
                    dedup_reserved = FALSE
                WHERE id = $1 AND claim_token = $2 AND processed_at IS NULL
                "#,
            )
            .bind(job.id)
            .bind(job.claim_token)
            .bind(until),
            JobOutcome::Rescheduled { attempts, until } => sqlx::query(
                r#"
                UPDATE push_queue
                SET attempts = GREATEST(attempts, $3), scheduled_at = $4,
                    claim_token = NULL, claimed_until = NULL, dedup_reserved = FALSE
                WHERE id = $1 AND claim_token = $2 AND processed_at IS NULL
                "#,
            )
            .bind(job.id)
            .bind(job.claim_token)
            .bind(attempts)
            .bind(until),
            JobOutcome::Processed {
                delivered,
                attempts,
            } => sqlx::query(
                r#"
                UPDATE push_queue
                SET processed_at = NOW(), delivered = $3, attempts = GREATEST(attempts, $4),
                    claim_token = NULL, claimed_until = NULL, dedup_reserved = FALSE
                WHERE id = $1 AND claim_token = $2 AND processed_at IS NULL
                "#,
            )
            .bind(job.id)
            .bind(job.claim_token)
            .bind(delivered)
            .bind(attempts),
        };

        let result = query.execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(AppError::ClaimLost(job.id));
        }
        Ok(())
    }

    async fn insert(&self, job: NewJob) -> Result<i64, AppError> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO push_queue (user_id, type, payload, scheduled_at, dedup_key)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(job.user_id)
        .bind(job.job_type.as_str())
        .bind(&job.payload)
        .bind(job.scheduled_at)
        .bind(&job.dedup_key)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn reserve_dedup_key(&self, query: &DuplicateQuery) -> Result<bool, AppError> {
        let delivered_since = match query.scope {
            DedupScope::Lifetime => None,
            DedupScope::Since(since) => Some(since),
        };

        let mut tx = self.pool.begin().await?;

        // Serializes check-and-reserve per (user, key) across workers.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("{}:{}", query.user_id, query.dedup_key))
            .execute(&mut *tx)
            .await?;

        let (duplicate,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM push_queue
                WHERE user_id = $1
                  AND dedup_key = $2
                  AND id <> $3
                  AND (
                      (processed_at IS NOT NULL
                          AND delivered = TRUE
                          AND ($4::timestamptz IS NULL OR processed_at >= $4))
                      OR (processed_at IS NULL
                          AND (dedup_reserved OR (scheduled_at, id) < ($5, $3)))
                  )
            )
            "#,
        )
        .bind(query.user_id)
        .bind(&query.dedup_key)
        .bind(query.job_id)
        .bind(delivered_since)
        .bind(query.scheduled_at)
        .fetch_one(&mut *tx)
        .await?;

        if !duplicate {
            sqlx::query("UPDATE push_queue SET dedup_reserved = TRUE WHERE id = $1")
                .bind(query.job_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(!duplicate)
    }

    async fn exists_for_key(&self, user_id: Uuid, dedup_key: &str) -> Result<bool, AppError> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM push_queue WHERE user_id = $1 AND dedup_key = $2)",
        )
        .bind(user_id)
        .bind(dedup_key)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }
}

/// `devices` backed token store.
#[derive(Clone)]
pub struct PgTokenRepository {
    pool: PgPool,
}

impl PgTokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenRepository for PgTokenRepository {
    async fn select_by_user(&self, user_id: Uuid) -> Result<Vec<DeviceToken>, AppError> {
        let tokens: Vec<DeviceToken> = sqlx::query_as(
            "SELECT token, user_id, project_id FROM devices WHERE user_id = $1 ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(tokens)
    }

    async fn delete_by_tokens(&self, tokens: &[String]) -> Result<u64, AppError> {
        if tokens.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM devices WHERE token = ANY($1)")
            .bind(tokens)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

/// Profile and match lookups against the application's own tables.
#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileReader for PgDirectory {
    async fn profile_meta(&self, user_id: Uuid) -> Result<Option<ProfileMeta>, AppError> {
        let profile: Option<ProfileMeta> = sqlx::query_as(
            r#"
            SELECT id AS user_id, display_name, avatar_url,
                   COALESCE(is_incognito, FALSE) AS incognito
            FROM profiles
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(profile)
    }
}

#[async_trait]
impl MatchReader for PgDirectory {
    async fn match_participants(
        &self,
        match_id: &str,
    ) -> Result<Option<MatchParticipants>, AppError> {
        // Match ids are UUIDs; anything else cannot name a match.
        let Ok(id) = Uuid::parse_str(match_id) else {
            return Ok(None);
        };
        let participants: Option<MatchParticipants> = sqlx::query_as(
            "SELECT id::text AS match_id, user_a, user_b FROM matches WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(participants)
    }
}
