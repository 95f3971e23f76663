//! Expo push service client.
//!
//! Posts batches of up to 100 messages to the Expo push endpoint and maps the
//! returned push tickets onto [`DeliveryResult`]s, one per message, in order.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use herald_common::error::AppError;
use herald_common::types::{DeliveryResult, DeliveryStatus, PushMessage};

use crate::DeliveryGateway;

/// Ticket error code for tokens Expo will never deliver to again.
const DEVICE_NOT_REGISTERED: &str = "DeviceNotRegistered";

/// HTTP gateway to the Expo push service.
pub struct ExpoGateway {
    client: reqwest::Client,
    endpoint: String,
    access_token: Option<String>,
    timeout: Duration,
}

impl ExpoGateway {
    pub fn new(
        endpoint: impl Into<String>,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            access_token,
            timeout,
        })
    }
}

#[async_trait]
impl DeliveryGateway for ExpoGateway {
    fn ready(&self) -> Result<(), AppError> {
        match &self.access_token {
            Some(token) if !token.is_empty() => Ok(()),
            _ => Err(AppError::Config(
                "EXPO_PUSH_ACCESS_TOKEN is not set".to_string(),
            )),
        }
    }

    async fn send(&self, batch: &[PushMessage]) -> Result<Vec<DeliveryResult>, AppError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let body: Vec<ExpoMessage<'_>> = batch.iter().map(ExpoMessage::from).collect();

        let mut request = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| self.request_error(e))?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(AppError::Gateway(format!("Expo responded with {status}")));
        }

        let parsed: ExpoResponse = response.json().await.map_err(|e| self.request_error(e))?;

        if !parsed.errors.is_empty() {
            let codes: Vec<&str> = parsed.errors.iter().map(|e| e.code.as_str()).collect();
            tracing::warn!(
                status = %status,
                errors = ?codes,
                messages = batch.len(),
                "Expo rejected push request"
            );
            return Err(AppError::Gateway(format!(
                "Expo request rejected: {}",
                codes.join(", ")
            )));
        }

        if parsed.data.len() != batch.len() {
            tracing::warn!(
                expected = batch.len(),
                received = parsed.data.len(),
                "Expo returned an unexpected number of push tickets"
            );
        }

        Ok(tickets_to_results(batch, parsed.data))
    }
}

impl ExpoGateway {
    fn request_error(&self, err: reqwest::Error) -> AppError {
        if err.is_timeout() {
            AppError::Timeout(self.timeout.as_millis() as u64)
        } else {
            AppError::Gateway(err.to_string())
        }
    }
}

/// Pair tickets with the messages they answer. Extra tickets are ignored and
/// missing ones produce no result, so callers can detect the shortfall.
fn tickets_to_results(batch: &[PushMessage], tickets: Vec<ExpoTicket>) -> Vec<DeliveryResult> {
    batch
        .iter()
        .zip(tickets)
        .map(|(message, ticket)| DeliveryResult {
            token: message.to.clone(),
            status: ticket.into_status(),
        })
        .collect()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExpoMessage<'a> {
    to: &'a str,
    title: &'a str,
    body: &'a str,
    data: &'a serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    sound: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ttl: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    badge: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    priority: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rich_content: Option<RichContent<'a>>,
}

#[derive(Debug, Serialize)]
struct RichContent<'a> {
    image: &'a str,
}

impl<'a> From<&'a PushMessage> for ExpoMessage<'a> {
    fn from(message: &'a PushMessage) -> Self {
        Self {
            to: &message.to,
            title: &message.title,
            body: &message.body,
            data: &message.data,
            sound: message.sound.as_deref(),
            ttl: message.ttl,
            badge: message.badge,
            priority: message.priority.as_deref(),
            rich_content: message.image.as_deref().map(|image| RichContent { image }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExpoResponse {
    #[serde(default)]
    data: Vec<ExpoTicket>,
    #[serde(default)]
    errors: Vec<ExpoRequestError>,
}

#[derive(Debug, Deserialize)]
struct ExpoRequestError {
    code: String,
}

#[derive(Debug, Deserialize)]
struct ExpoTicket {
    status: String,
    id: Option<String>,
    message: Option<String>,
    details: Option<ExpoTicketDetails>,
}

#[derive(Debug, Deserialize)]
struct ExpoTicketDetails {
    error: Option<String>,
}

impl ExpoTicket {
    fn into_status(self) -> DeliveryStatus {
        if self.status == "ok" {
            return DeliveryStatus::Ok { ticket_id: self.id };
        }

        let code = self.details.and_then(|d| d.error);
        match code.as_deref() {
            Some(DEVICE_NOT_REGISTERED) => DeliveryStatus::DeviceNotRegistered,
            Some(other) => DeliveryStatus::Transient(other.to_string()),
            None => DeliveryStatus::Transient(
                self.message.unwrap_or_else(|| "unknown Expo error".to_string()),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(token: &str) -> PushMessage {
        PushMessage {
            to: token.to_string(),
            title: "Neues Match".to_string(),
            body: "Ihr könnt jetzt chatten.".to_string(),
            data: json!({ "type": "match_new" }),
            sound: Some("default".to_string()),
            ttl: Some(259_200),
            badge: None,
            priority: Some("high".to_string()),
            image: None,
        }
    }

    #[test]
    fn test_tickets_map_to_statuses() {
        let batch = vec![message("a"), message("b"), message("c")];
        let response: ExpoResponse = serde_json::from_value(json!({
            "data": [
                { "status": "ok", "id": "ticket-1" },
                { "status": "error", "message": "gone", "details": { "error": "DeviceNotRegistered" } },
                { "status": "error", "message": "slow down", "details": { "error": "MessageRateExceeded" } }
            ]
        }))
        .unwrap();

        let results = tickets_to_results(&batch, response.data);

        assert_eq!(
            results,
            vec![
                DeliveryResult {
                    token: "a".to_string(),
                    status: DeliveryStatus::Ok {
                        ticket_id: Some("ticket-1".to_string())
                    },
                },
                DeliveryResult::not_registered("b"),
                DeliveryResult::transient("c", "MessageRateExceeded"),
            ]
        );
    }

    #[test]
    fn test_missing_tickets_are_not_invented() {
        let batch = vec![message("a"), message("b")];
        let response: ExpoResponse =
            serde_json::from_value(json!({ "data": [{ "status": "ok" }] })).unwrap();

        let results = tickets_to_results(&batch, response.data);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].token, "a");
    }

    #[test]
    fn test_error_without_details_is_transient() {
        let ticket: ExpoTicket =
            serde_json::from_value(json!({ "status": "error", "message": "boom" })).unwrap();
        assert_eq!(
            ticket.into_status(),
            DeliveryStatus::Transient("boom".to_string())
        );
    }

    #[test]
    fn test_message_serializes_in_expo_shape() {
        let mut msg = message("ExponentPushToken[x]");
        msg.image = Some("https://cdn.example/a.jpg".to_string());
        let value = serde_json::to_value(ExpoMessage::from(&msg)).unwrap();

        assert_eq!(value["to"], "ExponentPushToken[x]");
        assert_eq!(value["ttl"], 259_200);
        assert_eq!(value["richContent"]["image"], "https://cdn.example/a.jpg");
        assert!(value.get("badge").is_none());
    }

    #[test]
    fn test_gateway_requires_access_token() {
        let gateway =
            ExpoGateway::new("http://localhost:1", None, Duration::from_secs(1)).unwrap();
        assert!(matches!(gateway.ready(), Err(AppError::Config(_))));

        let gateway = ExpoGateway::new(
            "http://localhost:1",
            Some("secret".to_string()),
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(gateway.ready().is_ok());
    }
}
