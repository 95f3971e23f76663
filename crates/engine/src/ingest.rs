//! Job ingestion: parse the raw queue row into a typed job.

use herald_common::error::AppError;
use herald_common::payload::JobPayload;
use herald_common::types::{JobType, NotificationJob};

/// A claimed job whose type and payload have been decoded.
#[derive(Debug, Clone)]
pub struct DecodedJob {
    pub row: NotificationJob,
    pub payload: JobPayload,
}

impl DecodedJob {
    /// Fails on an unknown job type or a payload missing required fields.
    pub fn decode(row: &NotificationJob) -> Result<Self, AppError> {
        let job_type = row
            .job_type
            .parse::<JobType>()
            .map_err(AppError::Payload)?;
        let payload = JobPayload::decode(job_type, &row.payload)?;
        Ok(Self {
            row: row.clone(),
            payload,
        })
    }

    pub fn job_type(&self) -> JobType {
        self.payload.job_type()
    }

    pub fn dedup_key(&self) -> Option<String> {
        self.payload.dedup_key()
    }
}
