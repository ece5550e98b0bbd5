//! Storage seam for the messaging core.
//!
//! Every externally triggered operation runs inside one [`StoreTx`]. Dropping a
//! transaction without calling [`StoreTx::commit`] rolls it back.

use crate::error::AppResult;
use crate::models::{
    Conversation, ConversationSummary, ConversationUpdate, DeliveryStatus, EncryptedCord,
    Message, MessagePage, MessageUpdate, StatusRow,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::MemoryMessagingStore;
pub use postgres::PgMessagingStore;

#[async_trait]
pub trait MessagingStore: Send + Sync {
    async fn begin(&self) -> AppResult<Box<dyn StoreTx>>;
}

#[async_trait]
pub trait StoreTx: Send {
    // ---- conversations ----

    async fn find_conversation_by_key(&mut self, dedup_key: &str) -> AppResult<Option<Uuid>>;

    /// Insert unless another conversation already owns the dedup key.
    /// Returns `false` on a key conflict, in which case nothing was written.
    async fn insert_conversation(&mut self, conversation: &Conversation) -> AppResult<bool>;

    async fn update_conversation(
        &mut self,
        conversation_id: Uuid,
        update: &ConversationUpdate,
    ) -> AppResult<()>;

    /// Returns `false` when the user already participates.
    async fn insert_participant(
        &mut self,
        conversation_id: Uuid,
        user_id: Uuid,
        joined_at: DateTime<Utc>,
    ) -> AppResult<bool>;

    async fn is_participant(&mut self, conversation_id: Uuid, user_id: Uuid) -> AppResult<bool>;

    async fn participant_ids(&mut self, conversation_id: Uuid) -> AppResult<Vec<Uuid>>;

    /// Newest `updated_at` first
    async fn list_conversations_for(&mut self, user_id: Uuid)
        -> AppResult<Vec<ConversationSummary>>;

    async fn insert_cord(&mut self, cord: &EncryptedCord) -> AppResult<()>;

    async fn active_cord(&mut self, conversation_id: Uuid) -> AppResult<Option<EncryptedCord>>;

    // ---- messages ----

    async fn insert_message(&mut self, message: &Message) -> AppResult<()>;

    /// Fetch a message of the given conversation and lock it for the rest of
    /// the transaction.
    async fn lock_message(
        &mut self,
        conversation_id: Uuid,
        message_id: Uuid,
    ) -> AppResult<Option<Message>>;

    async fn update_message(&mut self, message_id: Uuid, update: &MessageUpdate) -> AppResult<()>;

    /// Ascending by `(created_at, id)`; the newest `page.limit` rows before
    /// the cursor. Rows past their `delete_at` are skipped.
    async fn list_messages(
        &mut self,
        conversation_id: Uuid,
        page: MessagePage,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Message>>;

    /// Set `delete_at` on every encrypted message of the conversation that has
    /// none yet and was not sent by `reader`. Returns the number of rows stamped.
    async fn stamp_delete_at(
        &mut self,
        conversation_id: Uuid,
        reader: Uuid,
        deadline: DateTime<Utc>,
    ) -> AppResult<u64>;

    /// Hard-delete messages whose deadline passed. Status rows go with them.
    async fn purge_expired(&mut self, now: DateTime<Utc>) -> AppResult<u64>;

    // ---- delivery status ----

    async fn seed_status(
        &mut self,
        message_id: Uuid,
        rows: &[(Uuid, DeliveryStatus)],
        at: DateTime<Utc>,
    ) -> AppResult<()>;

    async fn get_status(&mut self, message_id: Uuid, user_id: Uuid)
        -> AppResult<Option<DeliveryStatus>>;

    /// Advance a status row. Backward or same-status writes are ignored.
    async fn write_status(
        &mut self,
        message_id: Uuid,
        user_id: Uuid,
        status: DeliveryStatus,
        at: DateTime<Utc>,
    ) -> AppResult<()>;

    /// Rows of non-sender participants whose status is anything but `status`
    async fn count_recipients_not_at(
        &mut self,
        message_id: Uuid,
        sender_id: Uuid,
        status: DeliveryStatus,
    ) -> AppResult<i64>;

    async fn list_statuses(&mut self, message_id: Uuid) -> AppResult<Vec<StatusRow>>;

    /// Messages of the conversation where the user's own row is below `status`,
    /// oldest first
    async fn messages_below_for(
        &mut self,
        conversation_id: Uuid,
        user_id: Uuid,
        status: DeliveryStatus,
    ) -> AppResult<Vec<Uuid>>;

    // ---- unread counters ----

    /// Increment every participant's counter except `except_user`
    async fn increment_unread(&mut self, conversation_id: Uuid, except_user: Uuid)
        -> AppResult<u64>;

    async fn reset_unread(
        &mut self,
        conversation_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<()>;

    async fn unread_count(&mut self, conversation_id: Uuid, user_id: Uuid)
        -> AppResult<Option<i32>>;

    async fn commit(self: Box<Self>) -> AppResult<()>;
}
