//! Events pushed to live connections.
//!
//! Wire shape is flat:
//! ```json
//! { "type": "new_message", "timestamp": "...", "conversation_id": "...", ... }
//! ```
//! Events are hints. The message list endpoint stays authoritative.

use crate::models::{DeliveryStatus, Message};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FanoutEvent {
    /// Committed message, sent to every participant
    #[serde(rename = "new_message")]
    NewMessage {
        conversation_id: Uuid,
        message: Message,
        sender_name: String,
    },

    /// Message-level status advanced, sent to the sender only
    #[serde(rename = "message_status_update")]
    MessageStatusUpdate {
        conversation_id: Uuid,
        message_id: Uuid,
        status: DeliveryStatus,
    },
}

impl FanoutEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::NewMessage { .. } => "new_message",
            Self::MessageStatusUpdate { .. } => "message_status_update",
        }
    }

    pub fn conversation_id(&self) -> Uuid {
        match self {
            Self::NewMessage {
                conversation_id, ..
            }
            | Self::MessageStatusUpdate {
                conversation_id, ..
            } => *conversation_id,
        }
    }

    pub fn to_payload_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        let mut payload = serde_json::json!({
            "type": self.event_type(),
            "timestamp": Utc::now().to_rfc3339(),
        });

        // Externally tagged: {"new_message": {...}} -> flatten the inner fields
        if let serde_json::Value::Object(outer) = serde_json::to_value(self)? {
            for (_, inner) in outer {
                if let serde_json::Value::Object(fields) = inner {
                    for (key, value) in fields {
                        payload[key] = value;
                    }
                }
            }
        }

        Ok(payload)
    }

    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_payload_value()?)
    }

    /// Inverse of [`FanoutEvent::to_payload`], used by clients and the
    /// cross-instance listener.
    pub fn from_payload(payload: &str) -> Result<Self, serde_json::Error> {
        let mut value: serde_json::Value = serde_json::from_str(payload)?;
        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .unwrap_or_default();
        if let serde_json::Value::Object(map) = &mut value {
            map.remove("type");
            map.remove("timestamp");
        }
        let mut tagged = serde_json::Map::new();
        tagged.insert(kind, value);
        serde_json::from_value(serde_json::Value::Object(tagged))
    }
}

/// Events staged during a transaction, published only after it commits
#[derive(Debug, Default)]
pub struct PendingEvents {
    events: Vec<(Uuid, FanoutEvent)>,
}

impl PendingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, recipient: Uuid, event: FanoutEvent) {
        self.events.push((recipient, event));
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn into_inner(self) -> Vec<(Uuid, FanoutEvent)> {
        self.events
    }
}
