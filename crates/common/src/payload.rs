//! Typed job payloads.
//!
//! Producers have written the same logical field under several keys over time
//! (`match_id` / `matchId` / `match`, ...). Payloads are folded onto one
//! canonical key per field and decoded into a variant per job type once, when
//! a job is claimed, so the rest of the pipeline never walks alias chains.

use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::AppError;
use crate::types::JobType;

/// Canonical key followed by the historical spellings accepted for it, in
/// order of preference.
const FIELD_ALIASES: &[(&str, &[&str])] = &[
    ("match_id", &["match_id", "matchId", "match"]),
    ("other_user_id", &["other_user_id", "otherUserId", "partner_id", "partnerId"]),
    ("other_incognito", &["other_incognito", "otherIncognito"]),
    ("liker_id", &["liker_id", "likerId"]),
    ("liker_incognito", &["liker_incognito", "likerIncognito"]),
    ("message_id", &["message_id", "messageId"]),
    ("sender_id", &["sender_id", "senderId"]),
    ("preview", &["preview", "text"]),
    ("title", &["title"]),
    ("body", &["body"]),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchNewPayload {
    #[serde(deserialize_with = "id_string")]
    pub match_id: String,
    #[serde(default)]
    pub other_user_id: Option<Uuid>,
    #[serde(default)]
    pub other_incognito: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeReceivedPayload {
    pub liker_id: Uuid,
    #[serde(default)]
    pub liker_incognito: Option<bool>,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub match_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageNewPayload {
    #[serde(deserialize_with = "id_string")]
    pub match_id: String,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub message_id: Option<String>,
    #[serde(default)]
    pub sender_id: Option<Uuid>,
    #[serde(default)]
    pub preview: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestPushPayload {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

/// A job payload decoded for its job type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPayload {
    MatchNew(MatchNewPayload),
    LikeReceived(LikeReceivedPayload),
    MessageNew(MessageNewPayload),
    TestPush(TestPushPayload),
}

impl JobPayload {
    /// Decode a raw queue payload for the given job type.
    pub fn decode(job_type: JobType, raw: &Value) -> Result<Self, AppError> {
        let canonical = canonicalize(raw);
        let payload = match job_type {
            JobType::MatchNew => JobPayload::MatchNew(from_map(canonical)?),
            JobType::LikeReceived => JobPayload::LikeReceived(from_map(canonical)?),
            JobType::MessageNew => JobPayload::MessageNew(from_map(canonical)?),
            JobType::TestPush => JobPayload::TestPush(from_map(canonical)?),
        };
        Ok(payload)
    }

    pub fn job_type(&self) -> JobType {
        match self {
            JobPayload::MatchNew(_) => JobType::MatchNew,
            JobPayload::LikeReceived(_) => JobType::LikeReceived,
            JobPayload::MessageNew(_) => JobType::MessageNew,
            JobPayload::TestPush(_) => JobType::TestPush,
        }
    }

    /// Key identifying "the same notification" for one recipient.
    ///
    /// `None` means the job is never deduplicated.
    pub fn dedup_key(&self) -> Option<String> {
        match self {
            JobPayload::MatchNew(p) => Some(format!("match:{}", p.match_id)),
            JobPayload::LikeReceived(p) => Some(format!("like:{}", p.liker_id)),
            JobPayload::MessageNew(p) => p.message_id.as_ref().map(|id| format!("message:{id}")),
            JobPayload::TestPush(_) => None,
        }
    }
}

/// Fold every aliased key onto its canonical name. Keys without aliases are
/// dropped; a null or empty-string alias does not shadow a later one.
fn canonicalize(raw: &Value) -> Map<String, Value> {
    let mut out = Map::new();
    let Some(object) = raw.as_object() else {
        return out;
    };

    for (canonical, aliases) in FIELD_ALIASES {
        let found = aliases
            .iter()
            .filter_map(|alias| object.get(*alias))
            .find(|value| !is_blank(value));
        if let Some(value) = found {
            out.insert((*canonical).to_string(), value.clone());
        }
    }
    out
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn from_map<T: DeserializeOwned>(map: Map<String, Value>) -> Result<T, AppError> {
    serde_json::from_value(Value::Object(map)).map_err(|e| AppError::Payload(e.to_string()))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(serde_json::Number),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(s) => s,
            RawId::Number(n) => n.to_string(),
        }
    }
}

/// Ids are strings in newer payloads and numbers in older ones.
fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    RawId::deserialize(deserializer).map(String::from)
}

fn opt_id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Option::<RawId>::deserialize(deserializer).map(|raw| raw.map(String::from))
}
