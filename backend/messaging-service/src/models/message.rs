use crate::error::AppError;
use crate::models::status::DeliveryStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MAX_TEXT_CHARS: usize = 10_000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
}

/// Stored message. Immutable apart from `status` and `delete_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub text: Option<String>,
    pub image_url: Option<String>,
    pub video_url: Option<String>,
    pub metadata: serde_json::Value,
    pub is_encrypted: bool,
    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
    pub delete_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.delete_at, Some(at) if at <= now)
    }
}

/// Unvalidated send request
#[derive(Debug, Clone, Default)]
pub struct MessageDraft {
    pub text: Option<String>,
    pub media: Option<MediaRef>,
    pub metadata: Option<serde_json::Value>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Draft that passed content validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedDraft {
    pub text: Option<String>,
    pub image_url: Option<String>,
    pub video_url: Option<String>,
    pub metadata: serde_json::Value,
}

impl MessageDraft {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Blank text/media fields are dropped; at least one must remain and text
    /// may not exceed [`MAX_TEXT_CHARS`] characters.
    pub fn validate(self) -> Result<ValidatedDraft, AppError> {
        let text = non_blank(self.text);
        let media = self.media.unwrap_or_default();
        let image_url = non_blank(media.image_url);
        let video_url = non_blank(media.video_url);

        if text.is_none() && image_url.is_none() && video_url.is_none() {
            return Err(AppError::InvalidInput(
                "Message must contain text or media".into(),
            ));
        }
        if let Some(t) = &text {
            if t.chars().count() > MAX_TEXT_CHARS {
                return Err(AppError::InvalidInput("Message too long".into()));
            }
        }

        let metadata = match self.metadata {
            None | Some(serde_json::Value::Null) => serde_json::json!({}),
            Some(v @ serde_json::Value::Object(_)) => v,
            Some(_) => {
                return Err(AppError::InvalidInput(
                    "metadata must be a JSON object".into(),
                ))
            }
        };

        Ok(ValidatedDraft {
            text,
            image_url,
            video_url,
            metadata,
        })
    }
}

/// Optional-field patch for a message row. Only `Some` fields are written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageUpdate {
    pub status: Option<DeliveryStatus>,
    /// `Some(None)` clears the deadline
    pub delete_at: Option<Option<DateTime<Utc>>>,
}

impl MessageUpdate {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.delete_at.is_none()
    }

    pub fn apply(&self, message: &mut Message) {
        if let Some(status) = self.status {
            message.status = status;
        }
        if let Some(delete_at) = self.delete_at {
            message.delete_at = delete_at;
        }
    }
}

/// One (message, participant) status row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRow {
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub status: DeliveryStatus,
    pub updated_at: DateTime<Utc>,
}

/// Cursor page over a conversation's messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessagePage {
    /// Only messages created strictly before this instant
    pub before: Option<DateTime<Utc>>,
    pub limit: i64,
}
