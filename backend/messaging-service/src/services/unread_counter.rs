use crate::error::{AppError, AppResult};
use crate::models::DeliveryStatus;
use crate::repository::StoreTx;
use crate::services::status_tracker::StatusTracker;
use crate::state::AppState;
use crate::websocket::events::PendingEvents;
use crate::websocket::fanout::publish_after_commit;
use chrono::Utc;
use uuid::Uuid;

pub struct UnreadCounter;

impl UnreadCounter {
    pub async fn increment(
        tx: &mut dyn StoreTx,
        conversation_id: Uuid,
        except_user: Uuid,
    ) -> AppResult<u64> {
        tx.increment_unread(conversation_id, except_user).await
    }

    /// Mark the whole conversation read for `user_id`.
    ///
    /// Zeroes the counter, starts self-destruct deadlines when the conversation
    /// has an active cord, and cascades `read` to every message still below it
    /// for this user. Safe to repeat.
    pub async fn reset(state: &AppState, conversation_id: Uuid, user_id: Uuid) -> AppResult<()> {
        let now = Utc::now();
        let mut tx = state.store.begin().await?;
        if !tx.is_participant(conversation_id, user_id).await? {
            return Err(AppError::Unauthorized);
        }

        tx.reset_unread(conversation_id, user_id, now).await?;

        if let Some(cord) = tx.active_cord(conversation_id).await? {
            let deadline = cord.deadline_from(now);
            let stamped = tx.stamp_delete_at(conversation_id, user_id, deadline).await?;
            if stamped > 0 {
                tracing::info!(
                    conversation_id = %conversation_id,
                    stamped,
                    delete_at = %deadline,
                    "self-destruct deadlines set"
                );
            }
        }

        let mut events = PendingEvents::new();
        let mut rollups = Vec::new();
        let pending = tx
            .messages_below_for(conversation_id, user_id, DeliveryStatus::Read)
            .await?;
        for message_id in pending {
            let rolled = StatusTracker::apply(
                tx.as_mut(),
                conversation_id,
                message_id,
                user_id,
                DeliveryStatus::Read,
                now,
                &mut events,
            )
            .await?;
            rollups.extend(rolled);
        }

        tx.commit().await?;

        StatusTracker::record_rollups(&rollups);
        publish_after_commit(state.fanout.as_ref(), events).await;
        Ok(())
    }
}
