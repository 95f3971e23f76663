//! Notification queue processor.
//!
//! One sweep:
//! 1. Claims due jobs (exclusive, leased)
//! 2. Decodes them and tags their dedup keys for the whole batch
//! 3. Runs each job through quiet hours, attempt limit, misaddress repair,
//!    dedup, subject lookup, reciprocal synthesis, token resolution,
//!    composition, delivery and the retry decision
//! 4. Writes exactly one outcome per job under its claim

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use uuid::Uuid;

use herald_common::config::AppConfig;
use herald_common::error::AppError;
use herald_common::payload::JobPayload;
use herald_common::types::{DeliveryResult, JobOutcome, NotificationJob, PushMessage};
use herald_notifier::DeliveryGateway;

use crate::composer::{Subject, compose};
use crate::dedup::DedupGuard;
use crate::ingest::DecodedJob;
use crate::quiet_hours::QuietHours;
use crate::reciprocal::{ReciprocalSynthesizer, RepairStatus};
use crate::repository::{MatchReader, ProfileReader, QueueRepository};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::tokens::TokenRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    pub sweep_limit: u32,
    pub concurrency: usize,
    pub claim_lease: Duration,
    pub repair_misaddressed: bool,
    pub max_attempts: i32,
}

impl ProcessorConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            sweep_limit: config.push_sweep_limit,
            concurrency: config.push_concurrency.max(1),
            claim_lease: Duration::from_secs(config.push_claim_lease_secs),
            repair_misaddressed: config.push_repair_misaddressed,
            max_attempts: i32::try_from(config.push_max_attempts)
                .unwrap_or(i32::MAX)
                .max(1),
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            sweep_limit: 50,
            concurrency: 8,
            claim_lease: Duration::from_secs(300),
            repair_misaddressed: true,
            max_attempts: 5,
        }
    }
}

/// Counters for one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub claimed: u32,
    pub delivered: u32,
    /// Duplicates, misaddressed jobs and recipients without reachable devices.
    pub skipped: u32,
    /// Pushed past quiet hours.
    pub deferred: u32,
    pub rescheduled: u32,
    /// Misaddressed jobs re-enqueued for the right recipient.
    pub repaired: u32,
    /// Undecodable jobs and jobs whose processing hit an error.
    pub failed: u32,
    pub given_up: u32,
}

impl SweepReport {
    fn record(&mut self, disposition: Disposition) {
        let counter = match disposition {
            Disposition::Delivered => &mut self.delivered,
            Disposition::Skipped => &mut self.skipped,
            Disposition::Deferred => &mut self.deferred,
            Disposition::Rescheduled => &mut self.rescheduled,
            Disposition::Repaired => &mut self.repaired,
            Disposition::Failed => &mut self.failed,
            Disposition::GivenUp => &mut self.given_up,
        };
        *counter += 1;
    }
}

/// How a single job left the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Delivered,
    Skipped,
    Deferred,
    Rescheduled,
    Repaired,
    Failed,
    GivenUp,
}

/// A claimed row, decoded or not.
enum Claimed {
    Valid(DecodedJob),
    Invalid(NotificationJob, AppError),
}

impl Claimed {
    fn row(&self) -> &NotificationJob {
        match self {
            Claimed::Valid(job) => &job.row,
            Claimed::Invalid(row, _) => row,
        }
    }
}

pub struct NotificationQueueProcessor {
    config: ProcessorConfig,
    queue: Arc<dyn QueueRepository>,
    tokens: TokenRegistry,
    profiles: Arc<dyn ProfileReader>,
    matches: Arc<dyn MatchReader>,
    gateway: Arc<dyn DeliveryGateway>,
    quiet_hours: QuietHours,
    dedup: DedupGuard,
    retry: RetryPolicy,
    synthesizer: ReciprocalSynthesizer,
}

impl NotificationQueueProcessor {
    pub fn new(
        config: ProcessorConfig,
        queue: Arc<dyn QueueRepository>,
        tokens: TokenRegistry,
        profiles: Arc<dyn ProfileReader>,
        matches: Arc<dyn MatchReader>,
        gateway: Arc<dyn DeliveryGateway>,
        quiet_hours: QuietHours,
    ) -> Self {
        Self {
            dedup: DedupGuard::new(queue.clone()),
            retry: RetryPolicy::new(config.max_attempts),
            synthesizer: ReciprocalSynthesizer::new(queue.clone(), matches.clone()),
            config,
            queue,
            tokens,
            profiles,
            matches,
            gateway,
            quiet_hours,
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Run one sweep over at most `limit` due jobs.
    pub async fn process_batch(&self, limit: u32) -> Result<SweepReport, AppError> {
        self.process_batch_at(limit, Utc::now()).await
    }

    /// [`Self::process_batch`] with an explicit clock.
    ///
    /// Only a failure to claim or tag the batch is returned as `Err`; per-job
    /// errors are handled and counted.
    pub async fn process_batch_at(
        &self,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<SweepReport, AppError> {
        let mut report = SweepReport::default();

        if let Err(e) = self.gateway.ready() {
            tracing::warn!(error = %e, "Push gateway not configured, skipping sweep");
            return Ok(report);
        }

        let rows = self
            .queue
            .claim_pending(limit, now, self.config.claim_lease)
            .await?;
        if rows.is_empty() {
            return Ok(report);
        }
        report.claimed = rows.len() as u32;

        let claimed: Vec<Claimed> = rows
            .into_iter()
            .map(|row| match DecodedJob::decode(&row) {
                Ok(job) => Claimed::Valid(job),
                Err(e) => Claimed::Invalid(row, e),
            })
            .collect();

        let keys: Vec<(i64, String)> = claimed
            .iter()
            .filter_map(|c| match c {
                Claimed::Valid(job) => job.dedup_key().map(|key| (job.row.id, key)),
                Claimed::Invalid(..) => None,
            })
            .collect();
        if !keys.is_empty() {
            self.queue.tag_dedup_keys(&keys).await?;
        }

        let dispositions: Vec<Disposition> = stream::iter(claimed)
            .map(|job| self.run_job(job, now))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        for disposition in dispositions {
            report.record(disposition);
        }

        tracing::info!(
            claimed = report.claimed,
            delivered = report.delivered,
            skipped = report.skipped,
            deferred = report.deferred,
            rescheduled = report.rescheduled,
            repaired = report.repaired,
            failed = report.failed,
            given_up = report.given_up,
            "Push sweep finished"
        );
        Ok(report)
    }

    /// Run one job and absorb its errors.
    async fn run_job(&self, claimed: Claimed, now: DateTime<Utc>) -> Disposition {
        let row = claimed.row().clone();
        let result = match claimed {
            Claimed::Valid(job) => self.process_job(job, now).await,
            Claimed::Invalid(row, error) => self.discard_invalid(&row, error).await,
        };

        match result {
            Ok(disposition) => disposition,
            Err(AppError::ClaimLost(job_id)) => {
                tracing::warn!(job_id, "Claim lost before the job outcome was written");
                Disposition::Failed
            }
            Err(e) => self.recover(&row, e, now).await,
        }
    }

    /// Reschedule a job whose processing failed. If the write fails too, the
    /// claim lease runs out and a later sweep picks the job up again.
    async fn recover(&self, row: &NotificationJob, error: AppError, now: DateTime<Utc>) -> Disposition {
        let decision = self.retry.on_failure(row.attempts, now);
        tracing::error!(
            job_id = row.id,
            user_id = %row.user_id,
            attempts = row.attempts,
            transient = error.is_transient(),
            error = %error,
            "Push job failed"
        );

        match self.queue.apply(row, decision.outcome()).await {
            Ok(()) if matches!(decision, RetryDecision::GiveUp { .. }) => Disposition::GivenUp,
            Ok(()) => Disposition::Failed,
            Err(e) => {
                tracing::error!(job_id = row.id, error = %e, "Failed to reschedule push job");
                Disposition::Failed
            }
        }
    }

    async fn discard_invalid(
        &self,
        row: &NotificationJob,
        error: AppError,
    ) -> Result<Disposition, AppError> {
        tracing::warn!(
            job_id = row.id,
            job_type = %row.job_type,
            error = %error,
            "Discarding undecodable push job"
        );
        self.finalize(row, false).await?;
        Ok(Disposition::Failed)
    }

    async fn process_job(&self, job: DecodedJob, now: DateTime<Utc>) -> Result<Disposition, AppError> {
        let row = &job.row;

        if self.quiet_hours.is_quiet(now) {
            let until = self.quiet_hours.next_exit(now);
            self.queue.apply(row, JobOutcome::Deferred { until }).await?;
            tracing::debug!(job_id = row.id, until = %until, "Push deferred by quiet hours");
            return Ok(Disposition::Deferred);
        }

        if self.retry.exhausted(row.attempts) {
            tracing::warn!(
                job_id = row.id,
                attempts = row.attempts,
                "Push job out of attempts"
            );
            self.finalize(row, false).await?;
            return Ok(Disposition::GivenUp);
        }

        if ReciprocalSynthesizer::is_misaddressed(&job) {
            return self.handle_misaddressed(&job, now).await;
        }

        if self.dedup.should_skip(&job, now).await? {
            self.finalize(row, false).await?;
            return Ok(Disposition::Skipped);
        }

        let subject = self.resolve_subject(&job).await?;

        if let JobPayload::MatchNew(_) = &job.payload {
            let counterpart = subject.as_ref().map(|s| s.user_id);
            self.synthesizer
                .ensure_counterpart(&job, counterpart, now)
                .await?;
        }

        let tokens = self.tokens.resolve_tokens(row.user_id).await?;
        let tokens = self.tokens.filter_allowed(tokens).await?;
        if tokens.is_empty() {
            tracing::info!(
                job_id = row.id,
                user_id = %row.user_id,
                "No deliverable device tokens"
            );
            self.finalize(row, false).await?;
            return Ok(Disposition::Skipped);
        }

        let targeted = tokens.len();
        let mut results: Vec<DeliveryResult> = Vec::with_capacity(targeted);
        for batch in self.tokens.partition_into_batches(tokens) {
            let messages: Vec<PushMessage> = batch
                .iter()
                .map(|token| compose(token, &job, subject.as_ref()))
                .collect();

            match self.gateway.send(&messages).await {
                Ok(batch_results) => results.extend(batch_results),
                Err(e) => {
                    tracing::warn!(
                        job_id = row.id,
                        batch_size = messages.len(),
                        error = %e,
                        "Push batch failed"
                    );
                    let reason = e.to_string();
                    results.extend(
                        batch
                            .iter()
                            .map(|token| DeliveryResult::transient(token.token.clone(), reason.clone())),
                    );
                }
            }
        }

        let assessment = self
            .retry
            .on_delivery_result(row.attempts, targeted, &results, now);

        if !assessment.stale_tokens.is_empty() {
            match self.tokens.purge(&assessment.stale_tokens).await {
                Ok(removed) => tracing::info!(
                    job_id = row.id,
                    user_id = %row.user_id,
                    removed,
                    "Purged unregistered device tokens"
                ),
                Err(e) => tracing::warn!(
                    job_id = row.id,
                    error = %e,
                    "Failed to purge unregistered device tokens"
                ),
            }
        }

        self.queue.apply(row, assessment.decision.outcome()).await?;

        let disposition = match assessment.decision {
            RetryDecision::Finalize {
                delivered: false, ..
            } => {
                tracing::info!(
                    job_id = row.id,
                    user_id = %row.user_id,
                    tokens = targeted,
                    "No device accepted the push"
                );
                Disposition::Skipped
            }
            RetryDecision::Finalize { .. } => {
                tracing::info!(
                    job_id = row.id,
                    user_id = %row.user_id,
                    job_type = %job.job_type(),
                    tokens = targeted,
                    "Push delivered"
                );
                Disposition::Delivered
            }
            RetryDecision::Reschedule { attempts, until } => {
                tracing::info!(
                    job_id = row.id,
                    attempts,
                    until = %until,
                    "Push rescheduled after transient failure"
                );
                Disposition::Rescheduled
            }
            RetryDecision::GiveUp { attempts } => {
                tracing::warn!(job_id = row.id, attempts, "Push given up");
                Disposition::GivenUp
            }
        };
        Ok(disposition)
    }

    async fn handle_misaddressed(
        &self,
        job: &DecodedJob,
        now: DateTime<Utc>,
    ) -> Result<Disposition, AppError> {
        let row = &job.row;
        if !self.config.repair_misaddressed {
            tracing::warn!(
                job_id = row.id,
                user_id = %row.user_id,
                "Dropping message job queued for its own sender"
            );
            self.finalize(row, false).await?;
            return Ok(Disposition::Skipped);
        }

        let status = self.synthesizer.repair_misaddressed(job, now).await?;
        self.finalize(row, false).await?;
        Ok(match status {
            RepairStatus::Repaired { .. } | RepairStatus::AlreadyQueued { .. } => {
                Disposition::Repaired
            }
            RepairStatus::Unresolved => Disposition::Skipped,
        })
    }

    /// The user the notification is about, as the profile store knows them.
    ///
    /// A subject without a profile is treated as incognito.
    async fn resolve_subject(&self, job: &DecodedJob) -> Result<Option<Subject>, AppError> {
        let subject_id = match &job.payload {
            JobPayload::MatchNew(p) => match p.other_user_id {
                Some(other) => Some(other),
                None => self.match_counterpart(job.row.user_id, &p.match_id).await?,
            },
            JobPayload::LikeReceived(p) => Some(p.liker_id),
            JobPayload::MessageNew(p) => p.sender_id,
            JobPayload::TestPush(_) => None,
        };

        let Some(user_id) = subject_id else {
            return Ok(None);
        };

        let subject = match self.profiles.profile_meta(user_id).await? {
            Some(profile) => Subject {
                user_id,
                display_name: profile.display_name,
                avatar_url: profile.avatar_url,
                incognito: profile.incognito,
            },
            None => Subject {
                user_id,
                display_name: None,
                avatar_url: None,
                incognito: true,
            },
        };
        Ok(Some(subject))
    }

    async fn match_counterpart(&self, recipient: Uuid, match_id: &str) -> Result<Option<Uuid>, AppError> {
        Ok(self
            .matches
            .match_participants(match_id)
            .await?
            .and_then(|p| p.counterpart_of(recipient)))
    }

    /// Terminal write. `attempts` is left as is.
    async fn finalize(&self, row: &NotificationJob, delivered: bool) -> Result<(), AppError> {
        self.queue
            .apply(
                row,
                JobOutcome::Processed {
                    delivered,
                    attempts: row.attempts,
                },
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counts_each_disposition() {
        let mut report = SweepReport::default();
        for d in [
            Disposition::Delivered,
            Disposition::Delivered,
            Disposition::Skipped,
            Disposition::Deferred,
            Disposition::Rescheduled,
            Disposition::Repaired,
            Disposition::Failed,
            Disposition::GivenUp,
        ] {
            report.record(d);
        }
        assert_eq!(report.delivered, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.deferred, 1);
        assert_eq!(report.rescheduled, 1);
        assert_eq!(report.repaired, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.given_up, 1);
    }

    #[test]
    fn test_config_clamps_attempts_and_concurrency() {
        let mut app = AppConfig {
            database_url: "postgres://localhost/herald".to_string(),
            redis_url: "redis://localhost:6379".to_string(),
            db_max_connections: 5,
            push_interval_secs: 30,
            push_sweep_limit: 10,
            push_batch_size: 50,
            push_max_attempts: 0,
            push_concurrency: 0,
            push_claim_lease_secs: 60,
            push_gateway_timeout_ms: 1_000,
            push_repair_misaddressed: false,
            quiet_hours: None,
            quiet_hours_utc_offset: "+00:00".to_string(),
            expo_push_endpoint: "http://localhost".to_string(),
            expo_access_token: None,
            expo_allowed_project_ids: Vec::new(),
            profile_cache_ttl_secs: 0,
        };
        let config = ProcessorConfig::from_app_config(&app);
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.claim_lease, Duration::from_secs(60));
        assert!(!config.repair_misaddressed);

        app.push_max_attempts = u32::MAX;
        assert_eq!(ProcessorConfig::from_app_config(&app).max_attempts, i32::MAX);
    }
}
