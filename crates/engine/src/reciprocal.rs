//! Reciprocal and corrective job synthesis.
//!
//! A match notifies both participants, but upstream producers sometimes only
//! enqueue one side. Message jobs occasionally get queued for their own
//! sender; those are re-addressed to the other participant.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::payload::JobPayload;
use herald_common::types::{JobType, NewJob};

use crate::ingest::DecodedJob;
use crate::repository::{MatchReader, QueueRepository};

/// Result of re-addressing a misaddressed message job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStatus {
    /// A corrected job was enqueued for `recipient`.
    Repaired { job_id: i64, recipient: Uuid },
    /// The corrected job already exists.
    AlreadyQueued { recipient: Uuid },
    /// The other participant could not be determined.
    Unresolved,
}

pub struct ReciprocalSynthesizer {
    queue: Arc<dyn QueueRepository>,
    matches: Arc<dyn MatchReader>,
}

impl ReciprocalSynthesizer {
    pub fn new(queue: Arc<dyn QueueRepository>, matches: Arc<dyn MatchReader>) -> Self {
        Self { queue, matches }
    }

    /// A `message_new` job addressed to the user who sent the message.
    pub fn is_misaddressed(job: &DecodedJob) -> bool {
        match &job.payload {
            JobPayload::MessageNew(p) => p.sender_id == Some(job.row.user_id),
            _ => false,
        }
    }

    /// Make sure the other participant of a new match gets a notification too.
    ///
    /// `counterpart` is the other participant as already resolved by the
    /// caller. Returns the id of the inserted job, or `None` when nothing was
    /// needed.
    pub async fn ensure_counterpart(
        &self,
        job: &DecodedJob,
        counterpart: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>, AppError> {
        let JobPayload::MatchNew(payload) = &job.payload else {
            return Ok(None);
        };
        let recipient = job.row.user_id;

        let Some(other) = counterpart else {
            tracing::debug!(
                job_id = job.row.id,
                match_id = %payload.match_id,
                "No counterpart found for match"
            );
            return Ok(None);
        };
        if other == recipient {
            return Ok(None);
        }

        let Some(dedup_key) = job.dedup_key() else {
            return Ok(None);
        };
        if self.queue.exists_for_key(other, &dedup_key).await? {
            return Ok(None);
        }

        let job_id = self
            .queue
            .insert(NewJob {
                user_id: other,
                job_type: JobType::MatchNew,
                payload: json!({
                    "match_id": payload.match_id,
                    "other_user_id": recipient,
                }),
                scheduled_at: now,
                dedup_key: Some(dedup_key),
            })
            .await?;

        tracing::info!(
            job_id,
            source_job_id = job.row.id,
            user_id = %other,
            match_id = %payload.match_id,
            "Enqueued reciprocal match notification"
        );
        Ok(Some(job_id))
    }

    /// Enqueue a copy of a misaddressed message job for the other match
    /// participant. The caller finalizes the original.
    pub async fn repair_misaddressed(
        &self,
        job: &DecodedJob,
        now: DateTime<Utc>,
    ) -> Result<RepairStatus, AppError> {
        let JobPayload::MessageNew(payload) = &job.payload else {
            return Ok(RepairStatus::Unresolved);
        };
        let sender = job.row.user_id;

        let recipient = self
            .matches
            .match_participants(&payload.match_id)
            .await?
            .and_then(|p| p.counterpart_of(sender));
        let Some(recipient) = recipient.filter(|r| *r != sender) else {
            tracing::warn!(
                job_id = job.row.id,
                match_id = %payload.match_id,
                "Cannot re-address message job, match participants unknown"
            );
            return Ok(RepairStatus::Unresolved);
        };

        let dedup_key = job.dedup_key();
        if let Some(key) = &dedup_key {
            if self.queue.exists_for_key(recipient, key).await? {
                return Ok(RepairStatus::AlreadyQueued { recipient });
            }
        }

        let job_id = self
            .queue
            .insert(NewJob {
                user_id: recipient,
                job_type: JobType::MessageNew,
                payload: job.row.payload.clone(),
                scheduled_at: now,
                dedup_key,
            })
            .await?;

        tracing::info!(
            job_id,
            source_job_id = job.row.id,
            user_id = %recipient,
            "Re-addressed message job queued for its sender"
        );
        Ok(RepairStatus::Repaired { job_id, recipient })
    }
}
