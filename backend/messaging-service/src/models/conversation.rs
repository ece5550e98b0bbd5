use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Whether a conversation carries an active encrypted cord.
///
/// Plain and encrypted conversations between the same people are distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CordMode {
    Plain,
    Encrypted,
}

impl CordMode {
    pub fn from_flag(encrypted: bool) -> Self {
        if encrypted {
            Self::Encrypted
        } else {
            Self::Plain
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Encrypted => "encrypted",
        }
    }
}

/// Dedup key for a participant set: ids sorted ascending, then the mode.
///
/// Input order and duplicate ids do not affect the key.
pub fn dedup_key(participants: &[Uuid], mode: CordMode) -> String {
    let mut ids: Vec<Uuid> = participants.to_vec();
    ids.sort();
    ids.dedup();
    let joined = ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!("{}:{}", joined, mode.as_str())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: Uuid,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub dedup_key: Option<String>,
}

impl Conversation {
    pub fn new(created_by: Uuid, dedup_key: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_by,
            created_at: now,
            updated_at: now,
            last_message_at: None,
            dedup_key: Some(dedup_key),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub unread_count: i32,
    pub last_read_at: Option<DateTime<Utc>>,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedCord {
    pub conversation_id: Uuid,
    pub is_active: bool,
    /// seconds
    pub self_destruct_timer: i32,
    pub created_at: DateTime<Utc>,
}

impl EncryptedCord {
    pub fn deadline_from(&self, read_at: DateTime<Utc>) -> DateTime<Utc> {
        read_at + chrono::Duration::seconds(i64::from(self.self_destruct_timer))
    }
}

/// Optional-field patch for a conversation row. Only `Some` fields are written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationUpdate {
    pub updated_at: Option<DateTime<Utc>>,
    pub last_message_at: Option<DateTime<Utc>>,
    /// `Some(None)` clears the key
    pub dedup_key: Option<Option<String>>,
}

impl ConversationUpdate {
    pub fn is_empty(&self) -> bool {
        self.updated_at.is_none() && self.last_message_at.is_none() && self.dedup_key.is_none()
    }

    pub fn apply(&self, conversation: &mut Conversation) {
        if let Some(ts) = self.updated_at {
            conversation.updated_at = ts;
        }
        if let Some(ts) = self.last_message_at {
            conversation.last_message_at = Some(ts);
        }
        if let Some(key) = &self.dedup_key {
            conversation.dedup_key = key.clone();
        }
    }
}

/// Caller-scoped row of the conversation list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: Uuid,
    pub updated_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: i32,
    pub encrypted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_key_ignores_order_and_duplicates() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(
            dedup_key(&[a, b], CordMode::Plain),
            dedup_key(&[b, a, b], CordMode::Plain)
        );
    }

    #[test]
    fn dedup_key_separates_modes() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_ne!(
            dedup_key(&[a, b], CordMode::Plain),
            dedup_key(&[a, b], CordMode::Encrypted)
        );
    }

    #[test]
    fn update_only_touches_provided_fields() {
        let now = Utc::now();
        let mut conv = Conversation::new(Uuid::new_v4(), "k".into(), now);
        let later = now + chrono::Duration::seconds(5);

        ConversationUpdate {
            updated_at: Some(later),
            ..Default::default()
        }
        .apply(&mut conv);
        assert_eq!(conv.updated_at, later);
        assert_eq!(conv.last_message_at, None);
        assert_eq!(conv.dedup_key.as_deref(), Some("k"));

        ConversationUpdate {
            dedup_key: Some(None),
            ..Default::default()
        }
        .apply(&mut conv);
        assert_eq!(conv.dedup_key, None);
    }

    #[test]
    fn cord_deadline_adds_timer() {
        let now = Utc::now();
        let cord = EncryptedCord {
            conversation_id: Uuid::new_v4(),
            is_active: true,
            self_destruct_timer: 60,
            created_at: now,
        };
        assert_eq!(cord.deadline_from(now), now + chrono::Duration::seconds(60));
    }
}
