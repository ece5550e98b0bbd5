//! In-process store used by tests and database-less local runs.
//!
//! `begin` takes the store-wide lock and works on a copy of the state; commit
//! swaps the copy in, drop discards it. Transactions are therefore fully
//! serialized. A transaction must not open a second one while it is alive.

use super::{MessagingStore, StoreTx};
use crate::error::{AppError, AppResult};
use crate::models::{
    Conversation, ConversationSummary, ConversationUpdate, DeliveryStatus, EncryptedCord,
    Message, MessagePage, MessageUpdate, Participant, StatusRow,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    conversations: HashMap<Uuid, Conversation>,
    participants: HashMap<(Uuid, Uuid), Participant>,
    cords: HashMap<Uuid, EncryptedCord>,
    messages: HashMap<Uuid, Message>,
    statuses: HashMap<(Uuid, Uuid), StatusRow>,
}

#[derive(Clone, Default)]
pub struct MemoryMessagingStore {
    state: Arc<Mutex<MemoryState>>,
    fail_next_commit: Arc<AtomicBool>,
}

impl MemoryMessagingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next commit fail, leaving the store untouched.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    pub async fn conversation_count(&self) -> usize {
        self.state.lock().await.conversations.len()
    }

    pub async fn message_count(&self) -> usize {
        self.state.lock().await.messages.len()
    }

    /// Force a message's deadline, e.g. to expire it in a test.
    pub async fn set_delete_at(&self, message_id: Uuid, delete_at: Option<DateTime<Utc>>) {
        if let Some(m) = self.state.lock().await.messages.get_mut(&message_id) {
            m.delete_at = delete_at;
        }
    }
}

#[async_trait]
impl MessagingStore for MemoryMessagingStore {
    async fn begin(&self) -> AppResult<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            working,
            fail_flag: self.fail_next_commit.clone(),
        }))
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    fail_flag: Arc<AtomicBool>,
}

impl MemoryTx {
    fn created_at_of(&self, message_id: Uuid) -> Option<(DateTime<Utc>, Uuid)> {
        self.working
            .messages
            .get(&message_id)
            .map(|m| (m.created_at, m.id))
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn find_conversation_by_key(&mut self, dedup_key: &str) -> AppResult<Option<Uuid>> {
        Ok(self
            .working
            .conversations
            .values()
            .find(|c| c.dedup_key.as_deref() == Some(dedup_key))
            .map(|c| c.id))
    }

    async fn insert_conversation(&mut self, conversation: &Conversation) -> AppResult<bool> {
        if let Some(key) = &conversation.dedup_key {
            if self.find_conversation_by_key(key).await?.is_some() {
                return Ok(false);
            }
        }
        self.working
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(true)
    }

    async fn update_conversation(
        &mut self,
        conversation_id: Uuid,
        update: &ConversationUpdate,
    ) -> AppResult<()> {
        if let Some(key) = update.dedup_key.as_ref().and_then(|k| k.as_ref()) {
            let taken = self
                .working
                .conversations
                .values()
                .any(|c| c.id != conversation_id && c.dedup_key.as_deref() == Some(key.as_str()));
            if taken {
                return Err(AppError::Internal(format!(
                    "dedup key already owned by another conversation: {key}"
                )));
            }
        }
        if let Some(conv) = self.working.conversations.get_mut(&conversation_id) {
            update.apply(conv);
        }
        Ok(())
    }

    async fn insert_participant(
        &mut self,
        conversation_id: Uuid,
        user_id: Uuid,
        joined_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        if !self.working.conversations.contains_key(&conversation_id) {
            return Err(AppError::NotFound);
        }
        let key = (conversation_id, user_id);
        if self.working.participants.contains_key(&key) {
            return Ok(false);
        }
        self.working.participants.insert(
            key,
            Participant {
                conversation_id,
                user_id,
                unread_count: 0,
                last_read_at: None,
                joined_at,
            },
        );
        Ok(true)
    }

    async fn is_participant(&mut self, conversation_id: Uuid, user_id: Uuid) -> AppResult<bool> {
        Ok(self
            .working
            .participants
            .contains_key(&(conversation_id, user_id)))
    }

    async fn participant_ids(&mut self, conversation_id: Uuid) -> AppResult<Vec<Uuid>> {
        let mut members: Vec<&Participant> = self
            .working
            .participants
            .values()
            .filter(|p| p.conversation_id == conversation_id)
            .collect();
        members.sort_by_key(|p| (p.joined_at, p.user_id));
        Ok(members.into_iter().map(|p| p.user_id).collect())
    }

    async fn list_conversations_for(
        &mut self,
        user_id: Uuid,
    ) -> AppResult<Vec<ConversationSummary>> {
        let mut out: Vec<ConversationSummary> = self
            .working
            .participants
            .values()
            .filter(|p| p.user_id == user_id)
            .filter_map(|p| {
                let conv = self.working.conversations.get(&p.conversation_id)?;
                Some(ConversationSummary {
                    id: conv.id,
                    updated_at: conv.updated_at,
                    last_message_at: conv.last_message_at,
                    unread_count: p.unread_count,
                    encrypted: self
                        .working
                        .cords
                        .get(&conv.id)
                        .map(|c| c.is_active)
                        .unwrap_or(false),
                })
            })
            .collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok(out)
    }

    async fn insert_cord(&mut self, cord: &EncryptedCord) -> AppResult<()> {
        self.working
            .cords
            .insert(cord.conversation_id, cord.clone());
        Ok(())
    }

    async fn active_cord(&mut self, conversation_id: Uuid) -> AppResult<Option<EncryptedCord>> {
        Ok(self
            .working
            .cords
            .get(&conversation_id)
            .filter(|c| c.is_active)
            .cloned())
    }

    async fn insert_message(&mut self, message: &Message) -> AppResult<()> {
        self.working.messages.insert(message.id, message.clone());
        Ok(())
    }

    async fn lock_message(
        &mut self,
        conversation_id: Uuid,
        message_id: Uuid,
    ) -> AppResult<Option<Message>> {
        Ok(self
            .working
            .messages
            .get(&message_id)
            .filter(|m| m.conversation_id == conversation_id)
            .cloned())
    }

    async fn update_message(&mut self, message_id: Uuid, update: &MessageUpdate) -> AppResult<()> {
        if let Some(m) = self.working.messages.get_mut(&message_id) {
            update.apply(m);
        }
        Ok(())
    }

    async fn list_messages(
        &mut self,
        conversation_id: Uuid,
        page: MessagePage,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Message>> {
        let mut rows: Vec<Message> = self
            .working
            .messages
            .values()
            .filter(|m| m.conversation_id == conversation_id)
            .filter(|m| !m.is_expired(now))
            .filter(|m| page.before.map_or(true, |b| m.created_at < b))
            .cloned()
            .collect();
        rows.sort_by_key(|m| (m.created_at, m.id));
        let limit = page.limit.max(0) as usize;
        let skip = rows.len().saturating_sub(limit);
        Ok(rows.split_off(skip))
    }

    async fn stamp_delete_at(
        &mut self,
        conversation_id: Uuid,
        reader: Uuid,
        deadline: DateTime<Utc>,
    ) -> AppResult<u64> {
        let mut stamped = 0;
        for m in self.working.messages.values_mut() {
            if m.conversation_id == conversation_id
                && m.is_encrypted
                && m.delete_at.is_none()
                && m.sender_id != reader
            {
                m.delete_at = Some(deadline);
                stamped += 1;
            }
        }
        Ok(stamped)
    }

    async fn purge_expired(&mut self, now: DateTime<Utc>) -> AppResult<u64> {
        let expired: Vec<Uuid> = self
            .working
            .messages
            .values()
            .filter(|m| m.is_expired(now))
            .map(|m| m.id)
            .collect();
        for id in &expired {
            self.working.messages.remove(id);
        }
        self.working
            .statuses
            .retain(|(message_id, _), _| !expired.contains(message_id));
        Ok(expired.len() as u64)
    }

    async fn seed_status(
        &mut self,
        message_id: Uuid,
        rows: &[(Uuid, DeliveryStatus)],
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        for (user_id, status) in rows {
            self.working
                .statuses
                .entry((message_id, *user_id))
                .or_insert(StatusRow {
                    message_id,
                    user_id: *user_id,
                    status: *status,
                    updated_at: at,
                });
        }
        Ok(())
    }

    async fn get_status(
        &mut self,
        message_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Option<DeliveryStatus>> {
        Ok(self
            .working
            .statuses
            .get(&(message_id, user_id))
            .map(|r| r.status))
    }

    async fn write_status(
        &mut self,
        message_id: Uuid,
        user_id: Uuid,
        status: DeliveryStatus,
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        if let Some(row) = self.working.statuses.get_mut(&(message_id, user_id)) {
            if row.status.advances_to(status) {
                row.status = status;
                row.updated_at = at;
            }
        }
        Ok(())
    }

    async fn count_recipients_not_at(
        &mut self,
        message_id: Uuid,
        sender_id: Uuid,
        status: DeliveryStatus,
    ) -> AppResult<i64> {
        Ok(self
            .working
            .statuses
            .values()
            .filter(|r| r.message_id == message_id && r.user_id != sender_id && r.status != status)
            .count() as i64)
    }

    async fn list_statuses(&mut self, message_id: Uuid) -> AppResult<Vec<StatusRow>> {
        let mut rows: Vec<StatusRow> = self
            .working
            .statuses
            .values()
            .filter(|r| r.message_id == message_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.user_id);
        Ok(rows)
    }

    async fn messages_below_for(
        &mut self,
        conversation_id: Uuid,
        user_id: Uuid,
        status: DeliveryStatus,
    ) -> AppResult<Vec<Uuid>> {
        let mut keyed: Vec<(DateTime<Utc>, Uuid)> = self
            .working
            .statuses
            .values()
            .filter(|r| r.user_id == user_id && r.status < status)
            .filter(|r| {
                self.working
                    .messages
                    .get(&r.message_id)
                    .map_or(false, |m| m.conversation_id == conversation_id)
            })
            .filter_map(|r| self.created_at_of(r.message_id))
            .collect();
        keyed.sort();
        Ok(keyed.into_iter().map(|(_, id)| id).collect())
    }

    async fn increment_unread(
        &mut self,
        conversation_id: Uuid,
        except_user: Uuid,
    ) -> AppResult<u64> {
        let mut touched = 0;
        for p in self.working.participants.values_mut() {
            if p.conversation_id == conversation_id && p.user_id != except_user {
                p.unread_count += 1;
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn reset_unread(
        &mut self,
        conversation_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        if let Some(p) = self
            .working
            .participants
            .get_mut(&(conversation_id, user_id))
        {
            p.unread_count = 0;
            p.last_read_at = Some(at);
        }
        Ok(())
    }

    async fn unread_count(
        &mut self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Option<i32>> {
        Ok(self
            .working
            .participants
            .get(&(conversation_id, user_id))
            .map(|p| p.unread_count))
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryTx {
            mut guard,
            working,
            fail_flag,
        } = *self;
        if fail_flag.swap(false, Ordering::SeqCst) {
            return Err(AppError::Internal("commit failed".into()));
        }
        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{dedup_key, CordMode};

    async fn seed_conversation(store: &MemoryMessagingStore, members: &[Uuid]) -> Uuid {
        let now = Utc::now();
        let conv = Conversation::new(members[0], dedup_key(members, CordMode::Plain), now);
        let mut tx = store.begin().await.unwrap();
        assert!(tx.insert_conversation(&conv).await.unwrap());
        for m in members {
            tx.insert_participant(conv.id, *m, now).await.unwrap();
        }
        tx.commit().await.unwrap();
        conv.id
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let store = MemoryMessagingStore::new();
        let conv = Conversation::new(Uuid::new_v4(), "k:plain".into(), Utc::now());
        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_conversation(&conv).await.unwrap();
        }
        assert_eq!(store.conversation_count().await, 0);
    }

    #[tokio::test]
    async fn failed_commit_leaves_state_untouched() {
        let store = MemoryMessagingStore::new();
        store.fail_next_commit();
        let conv = Conversation::new(Uuid::new_v4(), "k:plain".into(), Utc::now());
        let mut tx = store.begin().await.unwrap();
        tx.insert_conversation(&conv).await.unwrap();
        assert!(tx.commit().await.is_err());
        assert_eq!(store.conversation_count().await, 0);
    }

    #[tokio::test]
    async fn duplicate_dedup_key_is_reported() {
        let store = MemoryMessagingStore::new();
        let now = Utc::now();
        let first = Conversation::new(Uuid::new_v4(), "same".into(), now);
        let second = Conversation::new(Uuid::new_v4(), "same".into(), now);
        let mut tx = store.begin().await.unwrap();
        assert!(tx.insert_conversation(&first).await.unwrap());
        assert!(!tx.insert_conversation(&second).await.unwrap());
        assert_eq!(
            tx.find_conversation_by_key("same").await.unwrap(),
            Some(first.id)
        );
    }

    #[tokio::test]
    async fn unread_increment_skips_sender() {
        let store = MemoryMessagingStore::new();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let conv = seed_conversation(&store, &[a, b, c]).await;

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.increment_unread(conv, a).await.unwrap(), 2);
        assert_eq!(tx.unread_count(conv, a).await.unwrap(), Some(0));
        assert_eq!(tx.unread_count(conv, b).await.unwrap(), Some(1));
        assert_eq!(tx.unread_count(conv, c).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn message_page_returns_newest_window_ascending() {
        let store = MemoryMessagingStore::new();
        let a = Uuid::new_v4();
        let conv = seed_conversation(&store, &[a, Uuid::new_v4()]).await;
        let base = Utc::now();

        let mut tx = store.begin().await.unwrap();
        for i in 0..5 {
            let m = Message {
                id: Uuid::new_v4(),
                conversation_id: conv,
                sender_id: a,
                text: Some(format!("m{i}")),
                image_url: None,
                video_url: None,
                metadata: serde_json::json!({}),
                is_encrypted: false,
                status: DeliveryStatus::Sent,
                created_at: base + chrono::Duration::seconds(i),
                delete_at: None,
            };
            tx.insert_message(&m).await.unwrap();
        }

        let page = tx
            .list_messages(conv, MessagePage { before: None, limit: 2 }, base)
            .await
            .unwrap();
        let texts: Vec<_> = page.iter().filter_map(|m| m.text.clone()).collect();
        assert_eq!(texts, vec!["m3", "m4"]);

        let page = tx
            .list_messages(
                conv,
                MessagePage {
                    before: Some(base + chrono::Duration::seconds(3)),
                    limit: 10,
                },
                base,
            )
            .await
            .unwrap();
        let texts: Vec<_> = page.iter().filter_map(|m| m.text.clone()).collect();
        assert_eq!(texts, vec!["m0", "m1", "m2"]);
    }
}
