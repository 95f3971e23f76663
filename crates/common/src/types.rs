use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kinds of notification intents carried by the push queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    MatchNew,
    LikeReceived,
    MessageNew,
    TestPush,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::MatchNew => "match_new",
            JobType::LikeReceived => "like_received",
            JobType::MessageNew => "message_new",
            JobType::TestPush => "test_push",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobType {
    type Err = String;

    /// Accepts the canonical snake_case names and the dotted spellings older
    /// producers still write (`match.new`, `message.new`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('.', "_").as_str() {
            "match_new" => Ok(JobType::MatchNew),
            "like_received" => Ok(JobType::LikeReceived),
            "message_new" => Ok(JobType::MessageNew),
            "test_push" => Ok(JobType::TestPush),
            other => Err(format!("unknown job type '{other}'")),
        }
    }
}

/// A queued notification intent for one recipient, as claimed by a sweep.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationJob {
    pub id: i64,
    pub user_id: Uuid,
    /// Raw type column; parsed into [`JobType`] at ingestion.
    #[sqlx(rename = "type")]
    pub job_type: String,
    pub payload: serde_json::Value,
    pub scheduled_at: DateTime<Utc>,
    pub attempts: i32,
    /// Claim marker stamped by the sweep that selected this job.
    pub claim_token: Option<Uuid>,
}

/// A job the engine itself enqueues (reciprocal or corrective).
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub user_id: Uuid,
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub scheduled_at: DateTime<Utc>,
    pub dedup_key: Option<String>,
}

/// How a claimed job leaves the current sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Quiet hours: pushed forward without touching attempts.
    Deferred { until: DateTime<Utc> },
    /// Transient failure: retried later with the incremented attempt count.
    Rescheduled { attempts: i32, until: DateTime<Utc> },
    /// Terminal. `delivered` is true only when the push reached the gateway for every token.
    Processed { delivered: bool, attempts: i32 },
}

/// A registered device push token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeviceToken {
    pub token: String,
    pub user_id: Uuid,
    /// Expo project the token was issued for, when the client declared one.
    pub project_id: Option<String>,
}

/// Read-only projection of a user profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProfileMeta {
    pub user_id: Uuid,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub incognito: bool,
}

/// Read-only projection of the two participants of a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MatchParticipants {
    pub match_id: String,
    pub user_a: Uuid,
    pub user_b: Uuid,
}

impl MatchParticipants {
    /// The participant that is not `user_id`, if `user_id` takes part in the match.
    pub fn counterpart_of(&self, user_id: Uuid) -> Option<Uuid> {
        if self.user_a == user_id {
            Some(self.user_b)
        } else if self.user_b == user_id {
            Some(self.user_a)
        } else {
            None
        }
    }
}

/// Provider-agnostic push content addressed to one device token.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushMessage {
    pub to: String,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
    pub sound: Option<String>,
    /// Seconds the provider keeps the message for an offline device.
    pub ttl: Option<u32>,
    pub badge: Option<u32>,
    pub priority: Option<String>,
    /// Large image / avatar shown with the notification.
    pub image: Option<String>,
}

/// Per-message outcome reported by the delivery gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResult {
    pub token: String,
    pub status: DeliveryStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    Ok { ticket_id: Option<String> },
    /// Worth retrying: network, 5xx, throttling or an unclassified provider error.
    Transient(String),
    /// The provider no longer recognises the token.
    DeviceNotRegistered,
}

impl DeliveryResult {
    pub fn ok(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            status: DeliveryStatus::Ok { ticket_id: None },
        }
    }

    pub fn transient(token: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            status: DeliveryStatus::Transient(reason.into()),
        }
    }

    pub fn not_registered(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            status: DeliveryStatus::DeviceNotRegistered,
        }
    }
}
