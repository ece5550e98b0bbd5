use super::{MessagingStore, StoreTx};
use crate::error::{AppError, AppResult};
use crate::models::{
    Conversation, ConversationSummary, ConversationUpdate, DeliveryStatus, EncryptedCord,
    Message, MessagePage, MessageUpdate, StatusRow,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use uuid::Uuid;

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, text, image_url, video_url, \
     metadata, is_encrypted, status, created_at, delete_at";

#[derive(Clone)]
pub struct PgMessagingStore {
    pool: PgPool,
}

impl PgMessagingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl MessagingStore for PgMessagingStore {
    async fn begin(&self) -> AppResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

fn parse_status(raw: &str) -> AppResult<DeliveryStatus> {
    DeliveryStatus::from_db(raw)
        .ok_or_else(|| AppError::Internal(format!("unknown delivery status in database: {raw}")))
}

fn message_from_row(row: &PgRow) -> AppResult<Message> {
    let status: String = row.try_get("status")?;
    Ok(Message {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        sender_id: row.try_get("sender_id")?,
        text: row.try_get("text")?,
        image_url: row.try_get("image_url")?,
        video_url: row.try_get("video_url")?,
        metadata: row.try_get("metadata")?,
        is_encrypted: row.try_get("is_encrypted")?,
        status: parse_status(&status)?,
        created_at: row.try_get("created_at")?,
        delete_at: row.try_get("delete_at")?,
    })
}

fn cord_from_row(row: &PgRow) -> AppResult<EncryptedCord> {
    Ok(EncryptedCord {
        conversation_id: row.try_get("conversation_id")?,
        is_active: row.try_get("is_active")?,
        self_destruct_timer: row.try_get("self_destruct_timer")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Renders only the assignments present in the patch.
fn conversation_update_query(
    conversation_id: Uuid,
    update: &ConversationUpdate,
) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::<Postgres>::new("UPDATE conversations SET ");
    {
        let mut set = qb.separated(", ");
        if let Some(ts) = update.updated_at {
            set.push("updated_at = ").push_bind_unseparated(ts);
        }
        if let Some(ts) = update.last_message_at {
            set.push("last_message_at = ").push_bind_unseparated(ts);
        }
        if let Some(key) = &update.dedup_key {
            set.push("dedup_key = ").push_bind_unseparated(key.clone());
        }
    }
    qb.push(" WHERE id = ").push_bind(conversation_id);
    qb
}

fn message_update_query(message_id: Uuid, update: &MessageUpdate) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::<Postgres>::new("UPDATE messages SET ");
    {
        let mut set = qb.separated(", ");
        if let Some(status) = update.status {
            set.push("status = ").push_bind_unseparated(status.to_db());
        }
        if let Some(delete_at) = update.delete_at {
            set.push("delete_at = ").push_bind_unseparated(delete_at);
        }
    }
    qb.push(" WHERE id = ").push_bind(message_id);
    qb
}

#[async_trait]
impl StoreTx for PgTx {
    async fn find_conversation_by_key(&mut self, dedup_key: &str) -> AppResult<Option<Uuid>> {
        let id = sqlx::query_scalar::<_, Uuid>("SELECT id FROM conversations WHERE dedup_key = $1")
            .bind(dedup_key)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(id)
    }

    async fn insert_conversation(&mut self, conversation: &Conversation) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO conversations (id, created_by, created_at, updated_at, last_message_at, dedup_key)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (dedup_key) DO NOTHING
            "#,
        )
        .bind(conversation.id)
        .bind(conversation.created_by)
        .bind(conversation.created_at)
        .bind(conversation.updated_at)
        .bind(conversation.last_message_at)
        .bind(conversation.dedup_key.as_deref())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_conversation(
        &mut self,
        conversation_id: Uuid,
        update: &ConversationUpdate,
    ) -> AppResult<()> {
        if update.is_empty() {
            return Ok(());
        }
        conversation_update_query(conversation_id, update)
            .build()
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_participant(
        &mut self,
        conversation_id: Uuid,
        user_id: Uuid,
        joined_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO conversation_participants (conversation_id, user_id, unread_count, joined_at)
            VALUES ($1, $2, 0, $3)
            ON CONFLICT (conversation_id, user_id) DO NOTHING
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(joined_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn is_participant(&mut self, conversation_id: Uuid, user_id: Uuid) -> AppResult<bool> {
        let rec = sqlx::query(
            "SELECT 1 FROM conversation_participants WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(rec.is_some())
    }

    async fn participant_ids(&mut self, conversation_id: Uuid) -> AppResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT user_id FROM conversation_participants
            WHERE conversation_id = $1
            ORDER BY joined_at, user_id
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(ids)
    }

    async fn list_conversations_for(
        &mut self,
        user_id: Uuid,
    ) -> AppResult<Vec<ConversationSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.updated_at, c.last_message_at, p.unread_count,
                   COALESCE(ec.is_active, FALSE) AS encrypted
            FROM conversation_participants p
            JOIN conversations c ON c.id = p.conversation_id
            LEFT JOIN encrypted_cords ec ON ec.conversation_id = c.id
            WHERE p.user_id = $1
            ORDER BY c.updated_at DESC, c.id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter()
            .map(|row| -> AppResult<ConversationSummary> {
                Ok(ConversationSummary {
                    id: row.try_get("id")?,
                    updated_at: row.try_get("updated_at")?,
                    last_message_at: row.try_get("last_message_at")?,
                    unread_count: row.try_get("unread_count")?,
                    encrypted: row.try_get("encrypted")?,
                })
            })
            .collect()
    }

    async fn insert_cord(&mut self, cord: &EncryptedCord) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO encrypted_cords (conversation_id, is_active, self_destruct_timer, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(cord.conversation_id)
        .bind(cord.is_active)
        .bind(cord.self_destruct_timer)
        .bind(cord.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn active_cord(&mut self, conversation_id: Uuid) -> AppResult<Option<EncryptedCord>> {
        let row = sqlx::query(
            r#"
            SELECT conversation_id, is_active, self_destruct_timer, created_at
            FROM encrypted_cords
            WHERE conversation_id = $1 AND is_active
            "#,
        )
        .bind(conversation_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(cord_from_row).transpose()
    }

    async fn insert_message(&mut self, message: &Message) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO messages
                (id, conversation_id, sender_id, text, image_url, video_url,
                 metadata, is_encrypted, status, created_at, delete_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(message.id)
        .bind(message.conversation_id)
        .bind(message.sender_id)
        .bind(message.text.as_deref())
        .bind(message.image_url.as_deref())
        .bind(message.video_url.as_deref())
        .bind(&message.metadata)
        .bind(message.is_encrypted)
        .bind(message.status.to_db())
        .bind(message.created_at)
        .bind(message.delete_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn lock_message(
        &mut self,
        conversation_id: Uuid,
        message_id: Uuid,
    ) -> AppResult<Option<Message>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1 AND conversation_id = $2 FOR UPDATE"
        );
        let row = sqlx::query(&sql)
            .bind(message_id)
            .bind(conversation_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(message_from_row).transpose()
    }

    async fn update_message(&mut self, message_id: Uuid, update: &MessageUpdate) -> AppResult<()> {
        if update.is_empty() {
            return Ok(());
        }
        message_update_query(message_id, update)
            .build()
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn list_messages(
        &mut self,
        conversation_id: Uuid,
        page: MessagePage,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Message>> {
        let sql = format!(
            r#"
            SELECT {MESSAGE_COLUMNS} FROM (
                SELECT {MESSAGE_COLUMNS} FROM messages
                WHERE conversation_id = $1
                  AND (delete_at IS NULL OR delete_at > $2)
                  AND ($3::timestamptz IS NULL OR created_at < $3)
                ORDER BY created_at DESC, id DESC
                LIMIT $4
            ) page
            ORDER BY created_at ASC, id ASC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(conversation_id)
            .bind(now)
            .bind(page.before)
            .bind(page.limit)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(message_from_row).collect()
    }

    async fn stamp_delete_at(
        &mut self,
        conversation_id: Uuid,
        reader: Uuid,
        deadline: DateTime<Utc>,
    ) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE messages SET delete_at = $2
            WHERE conversation_id = $1 AND is_encrypted AND delete_at IS NULL
              AND sender_id <> $3
            "#,
        )
        .bind(conversation_id)
        .bind(deadline)
        .bind(reader)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn purge_expired(&mut self, now: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM messages WHERE delete_at IS NOT NULL AND delete_at <= $1")
            .bind(now)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn seed_status(
        &mut self,
        message_id: Uuid,
        rows: &[(Uuid, DeliveryStatus)],
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut qb = QueryBuilder::<Postgres>::new(
            "INSERT INTO message_status (message_id, user_id, status, updated_at) ",
        );
        qb.push_values(rows.iter(), |mut b, &(user_id, status)| {
            b.push_bind(message_id)
                .push_bind(user_id)
                .push_bind(status.to_db())
                .push_bind(at);
        });
        qb.push(" ON CONFLICT (message_id, user_id) DO NOTHING");
        qb.build().execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn get_status(
        &mut self,
        message_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Option<DeliveryStatus>> {
        let raw = sqlx::query_scalar::<_, String>(
            "SELECT status FROM message_status WHERE message_id = $1 AND user_id = $2",
        )
        .bind(message_id)
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        raw.as_deref().map(parse_status).transpose()
    }

    async fn write_status(
        &mut self,
        message_id: Uuid,
        user_id: Uuid,
        status: DeliveryStatus,
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE message_status SET status = $3, updated_at = $4
            WHERE message_id = $1 AND user_id = $2
              AND message_status_rank(status) < message_status_rank($3)
            "#,
        )
        .bind(message_id)
        .bind(user_id)
        .bind(status.to_db())
        .bind(at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn count_recipients_not_at(
        &mut self,
        message_id: Uuid,
        sender_id: Uuid,
        status: DeliveryStatus,
    ) -> AppResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM message_status
            WHERE message_id = $1 AND user_id <> $2 AND status <> $3
            "#,
        )
        .bind(message_id)
        .bind(sender_id)
        .bind(status.to_db())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count)
    }

    async fn list_statuses(&mut self, message_id: Uuid) -> AppResult<Vec<StatusRow>> {
        let rows = sqlx::query(
            r#"
            SELECT message_id, user_id, status, updated_at FROM message_status
            WHERE message_id = $1
            ORDER BY user_id
            "#,
        )
        .bind(message_id)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter()
            .map(|row| -> AppResult<StatusRow> {
                let status: String = row.try_get("status")?;
                Ok(StatusRow {
                    message_id: row.try_get("message_id")?,
                    user_id: row.try_get("user_id")?,
                    status: parse_status(&status)?,
                    updated_at: row.try_get("updated_at")?,
                })
            })
            .collect()
    }

    async fn messages_below_for(
        &mut self,
        conversation_id: Uuid,
        user_id: Uuid,
        status: DeliveryStatus,
    ) -> AppResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT m.id FROM message_status ms
            JOIN messages m ON m.id = ms.message_id
            WHERE m.conversation_id = $1 AND ms.user_id = $2
              AND message_status_rank(ms.status) < $3
            ORDER BY m.created_at, m.id
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(status.rank())
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(ids)
    }

    async fn increment_unread(
        &mut self,
        conversation_id: Uuid,
        except_user: Uuid,
    ) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE conversation_participants SET unread_count = unread_count + 1
            WHERE conversation_id = $1 AND user_id <> $2
            "#,
        )
        .bind(conversation_id)
        .bind(except_user)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn reset_unread(
        &mut self,
        conversation_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE conversation_participants SET unread_count = 0, last_read_at = $3
            WHERE conversation_id = $1 AND user_id = $2
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn unread_count(
        &mut self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Option<i32>> {
        let count = sqlx::query_scalar::<_, i32>(
            r#"
            SELECT unread_count FROM conversation_participants
            WHERE conversation_id = $1 AND user_id = $2
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(count)
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let PgTx { tx } = *self;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_patch_renders_only_present_fields() {
        let id = Uuid::new_v4();
        let update = ConversationUpdate {
            updated_at: Some(Utc::now()),
            ..Default::default()
        };
        let qb = conversation_update_query(id, &update);
        assert_eq!(qb.sql(), "UPDATE conversations SET updated_at = $1 WHERE id = $2");

        let update = ConversationUpdate {
            updated_at: Some(Utc::now()),
            last_message_at: Some(Utc::now()),
            dedup_key: Some(None),
        };
        let qb = conversation_update_query(id, &update);
        assert_eq!(
            qb.sql(),
            "UPDATE conversations SET updated_at = $1, last_message_at = $2, dedup_key = $3 WHERE id = $4"
        );
    }

    #[test]
    fn message_patch_renders_only_present_fields() {
        let id = Uuid::new_v4();
        let update = MessageUpdate {
            status: Some(DeliveryStatus::Read),
            delete_at: None,
        };
        let qb = message_update_query(id, &update);
        assert_eq!(qb.sql(), "UPDATE messages SET status = $1 WHERE id = $2");

        let update = MessageUpdate {
            status: None,
            delete_at: Some(Some(Utc::now())),
        };
        let qb = message_update_query(id, &update);
        assert_eq!(qb.sql(), "UPDATE messages SET delete_at = $1 WHERE id = $2");
    }
}
