//! Inbound messages: application messages and push payloads.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ValidationError;
use crate::model::SchedulerSettings;
use crate::storage::NotificationsConfig;

/// Fire-and-forget messages from the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum AppMessage {
    UpdateSettings {
        settings: SchedulerSettings,
    },
    CancelNotifications {
        #[serde(rename = "obligationId")]
        obligation_id: String,
    },
}

impl AppMessage {
    /// # Errors
    /// Returns an error if `raw` is not a known message.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(raw).map_err(|e| ValidationError::InvalidMessage(e.to_string()))
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawNotification {
    title: Option<String>,
    body: Option<String>,
    icon: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawData {
    obligation_id: Option<String>,
}

/// Either the transport envelope or the flat shape.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPush {
    notification: Option<RawNotification>,
    data: Option<RawData>,
    title: Option<String>,
    body: Option<String>,
    icon: Option<String>,
    obligation_id: Option<String>,
    message_id: Option<String>,
    fcm_message_id: Option<String>,
}

/// A push message after defaults have been filled in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub icon: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub obligation_id: Option<String>,
    /// Transport id; a redelivery carries the same one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl PushPayload {
    fn defaults(config: &NotificationsConfig) -> Self {
        Self {
            title: config.default_title.clone(),
            body: config.default_body.clone(),
            icon: config.icon.clone(),
            obligation_id: None,
            message_id: None,
        }
    }

    /// Parse a push body. Never fails: a malformed body yields the default
    /// payload together with a description of the problem.
    pub fn parse(raw: &[u8], config: &NotificationsConfig) -> (Self, Option<String>) {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return (Self::defaults(config), None);
        }
        let parsed: RawPush = match serde_json::from_slice(raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                return (
                    Self::defaults(config),
                    Some(format!("malformed push payload: {err}")),
                )
            }
        };

        let notification = parsed.notification.unwrap_or_default();
        let data = parsed.data.unwrap_or_default();
        let payload = Self {
            title: non_empty(notification.title)
                .or_else(|| non_empty(parsed.title))
                .unwrap_or_else(|| config.default_title.clone()),
            body: non_empty(notification.body)
                .or_else(|| non_empty(parsed.body))
                .unwrap_or_else(|| config.default_body.clone()),
            icon: non_empty(notification.icon)
                .or_else(|| non_empty(parsed.icon))
                .unwrap_or_else(|| config.icon.clone()),
            obligation_id: non_empty(data.obligation_id).or_else(|| non_empty(parsed.obligation_id)),
            message_id: non_empty(parsed.message_id).or_else(|| non_empty(parsed.fcm_message_id)),
        };
        (payload, None)
    }

    /// Short digest identifying one delivery of an anonymous push.
    ///
    /// With a transport id only that id counts. Without one, the content
    /// counts together with `day`, so a redelivered wake is caught while
    /// the same text sent again on a later day is shown again.
    pub fn digest(&self, day: NaiveDate) -> String {
        let mut hasher = Sha256::new();
        match &self.message_id {
            Some(id) => {
                hasher.update(b"id\0");
                hasher.update(id.as_bytes());
            }
            None => {
                for part in [&self.title, &self.body, &self.icon] {
                    hasher.update(part.as_bytes());
                    hasher.update([0u8]);
                }
                hasher.update(day.to_string().as_bytes());
            }
        }
        let mut digest = hex::encode(hasher.finalize());
        digest.truncate(16);
        digest
    }
}
