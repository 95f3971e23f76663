//! Content composer: turns a job into provider-agnostic push content.
//!
//! Every notification that references another user (the liker, the other
//! match participant, the message sender) goes through [`Subject`] redaction
//! here: an incognito or unresolved subject never contributes a name, avatar
//! or user id to the message. Incognito flags carried in the job payload are
//! honored here as well, whatever the caller put into the subject.

use serde_json::{Map, Value, json};
use uuid::Uuid;

use herald_common::payload::JobPayload;
use herald_common::types::{DeviceToken, PushMessage};

use crate::ingest::DecodedJob;

/// Label shown instead of a redacted user's name.
pub const REDACTED_NAME: &str = "Jemand";

/// Keep match notifications in the notification center for three days.
pub const MATCH_TTL_SECS: u32 = 3 * 24 * 60 * 60;

const DEFAULT_MESSAGE_PREVIEW: &str = "Du hast eine neue Nachricht";
const DEFAULT_TEST_TITLE: &str = "Test-Benachrichtigung";
const DEFAULT_TEST_BODY: &str = "Push-Benachrichtigungen funktionieren.";

/// The user a notification is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub user_id: Uuid,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub incognito: bool,
}

/// What of a subject may be shown.
struct Identity<'a> {
    user_id: Option<Uuid>,
    name: Option<&'a str>,
    avatar: Option<&'a str>,
}

impl<'a> Identity<'a> {
    fn of(subject: Option<&'a Subject>, hidden: bool) -> Self {
        match subject {
            Some(s) if !s.incognito && !hidden => Self {
                user_id: Some(s.user_id),
                name: s.display_name.as_deref().filter(|n| !n.trim().is_empty()),
                avatar: s.avatar_url.as_deref(),
            },
            _ => Self {
                user_id: None,
                name: None,
                avatar: None,
            },
        }
    }

    fn label(&self) -> &str {
        self.name.unwrap_or(REDACTED_NAME)
    }

    fn write_into(&self, data: &mut Map<String, Value>, id_field: &str) {
        if let Some(id) = self.user_id {
            data.insert(id_field.to_string(), json!(id));
        }
        data.insert("display_name".to_string(), json!(self.label()));
        data.insert("avatar_url".to_string(), json!(self.avatar));
        data.insert("incognito".to_string(), json!(self.user_id.is_none()));
    }
}

/// Whether the producer marked the referenced user as incognito.
fn payload_incognito(payload: &JobPayload) -> bool {
    match payload {
        JobPayload::MatchNew(p) => p.other_incognito.unwrap_or(false),
        JobPayload::LikeReceived(p) => p.liker_incognito.unwrap_or(false),
        JobPayload::MessageNew(_) | JobPayload::TestPush(_) => false,
    }
}

/// Build the message for one device token.
///
/// `subject` is the user the job is about; `None` for a job that references a
/// user is composed as if that user were incognito. A payload incognito flag
/// redacts even a visible subject.
pub fn compose(token: &DeviceToken, job: &DecodedJob, subject: Option<&Subject>) -> PushMessage {
    let identity = Identity::of(subject, payload_incognito(&job.payload));
    let mut data = Map::new();
    data.insert("type".to_string(), json!(job.job_type().as_str()));

    let mut message = PushMessage {
        to: token.token.clone(),
        title: String::new(),
        body: String::new(),
        data: Value::Null,
        sound: Some("default".to_string()),
        ttl: None,
        badge: None,
        priority: Some("high".to_string()),
        image: identity.avatar.map(str::to_string),
    };

    match &job.payload {
        JobPayload::MatchNew(p) => {
            message.title = "Neues Match".to_string();
            message.body = match identity.name {
                Some(name) => format!("Du und {name} habt ein Match. Ihr könnt jetzt chatten."),
                None => "Du hast ein neues Match. Ihr könnt jetzt chatten.".to_string(),
            };
            message.ttl = Some(MATCH_TTL_SECS);
            data.insert("match_id".to_string(), json!(p.match_id));
            identity.write_into(&mut data, "other_user_id");
        }
        JobPayload::LikeReceived(p) => {
            message.title = "Neues Like".to_string();
            message.body = format!("{} gefällt dein Profil.", identity.label());
            if let Some(match_id) = &p.match_id {
                data.insert("match_id".to_string(), json!(match_id));
            }
            identity.write_into(&mut data, "liker_id");
        }
        JobPayload::MessageNew(p) => {
            message.title = identity.name.unwrap_or("Neue Nachricht").to_string();
            message.body = p
                .preview
                .as_deref()
                .map(str::trim)
                .filter(|preview| !preview.is_empty())
                .unwrap_or(DEFAULT_MESSAGE_PREVIEW)
                .to_string();
            message.badge = Some(1);
            data.insert("match_id".to_string(), json!(p.match_id));
            if let Some(message_id) = &p.message_id {
                data.insert("message_id".to_string(), json!(message_id));
            }
            identity.write_into(&mut data, "sender_id");
        }
        JobPayload::TestPush(p) => {
            message.title = p.title.clone().unwrap_or_else(|| DEFAULT_TEST_TITLE.to_string());
            message.body = p.body.clone().unwrap_or_else(|| DEFAULT_TEST_BODY.to_string());
            message.image = None;
        }
    }

    message.data = Value::Object(data);
    message
}
