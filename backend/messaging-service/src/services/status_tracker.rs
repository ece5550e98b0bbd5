//! Per-participant delivery status and the message-level rollup.
//!
//! Each (message, participant) row only moves forward: `sent -> delivered -> read`.
//! The message summary follows once every non-sender row sits exactly at the
//! applied status, and only then is the sender notified.

use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{DeliveryStatus, Message, MessageUpdate, StatusRow};
use crate::repository::StoreTx;
use crate::state::AppState;
use crate::websocket::events::{FanoutEvent, PendingEvents};
use crate::websocket::fanout::publish_after_commit;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub struct StatusTracker;

impl StatusTracker {
    /// Sender starts at `read`, everyone else at `sent`.
    pub async fn seed(tx: &mut dyn StoreTx, message: &Message, participants: &[Uuid]) -> AppResult<()> {
        let rows: Vec<(Uuid, DeliveryStatus)> = participants
            .iter()
            .map(|&user_id| {
                let status = if user_id == message.sender_id {
                    DeliveryStatus::Read
                } else {
                    DeliveryStatus::Sent
                };
                (user_id, status)
            })
            .collect();
        tx.seed_status(message.id, &rows, message.created_at).await
    }

    /// Apply one participant's status inside an open transaction.
    ///
    /// Returns the summary status when this write advanced it. Events for the
    /// sender are staged in `events`.
    pub async fn apply(
        tx: &mut dyn StoreTx,
        conversation_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        status: DeliveryStatus,
        at: DateTime<Utc>,
        events: &mut PendingEvents,
    ) -> AppResult<Option<DeliveryStatus>> {
        let message = tx
            .lock_message(conversation_id, message_id)
            .await?
            .ok_or(AppError::NotFound)?;

        // Members added after the message was sent have no row to advance
        let Some(current) = tx.get_status(message_id, user_id).await? else {
            tracing::debug!(
                message_id = %message_id,
                user_id = %user_id,
                "no status row for participant; ignoring"
            );
            return Ok(None);
        };
        if !current.advances_to(status) {
            return Ok(None);
        }

        tx.write_status(message_id, user_id, status, at).await?;
        Self::roll_up(tx, &message, status, events).await
    }

    async fn roll_up(
        tx: &mut dyn StoreTx,
        message: &Message,
        status: DeliveryStatus,
        events: &mut PendingEvents,
    ) -> AppResult<Option<DeliveryStatus>> {
        if !message.status.advances_to(status) {
            return Ok(None);
        }

        let lagging = tx
            .count_recipients_not_at(message.id, message.sender_id, status)
            .await?;
        if lagging > 0 {
            return Ok(None);
        }

        tx.update_message(
            message.id,
            &MessageUpdate {
                status: Some(status),
                ..Default::default()
            },
        )
        .await?;

        events.push(
            message.sender_id,
            FanoutEvent::MessageStatusUpdate {
                conversation_id: message.conversation_id,
                message_id: message.id,
                status,
            },
        );
        Ok(Some(status))
    }

    pub fn record_rollups(rollups: &[DeliveryStatus]) {
        for status in rollups {
            metrics::STATUS_ROLLUPS_TOTAL
                .with_label_values(&[status.to_db()])
                .inc();
        }
    }

    /// `updateStatus`: one transaction, sender notified after commit.
    pub async fn update_status(
        state: &AppState,
        conversation_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        status: DeliveryStatus,
    ) -> AppResult<()> {
        let mut tx = state.store.begin().await?;
        if !tx.is_participant(conversation_id, user_id).await? {
            return Err(AppError::Unauthorized);
        }

        let mut events = PendingEvents::new();
        let rolled = Self::apply(
            tx.as_mut(),
            conversation_id,
            message_id,
            user_id,
            status,
            Utc::now(),
            &mut events,
        )
        .await?;
        tx.commit().await?;

        if let Some(summary) = rolled {
            tracing::debug!(
                conversation_id = %conversation_id,
                message_id = %message_id,
                status = %summary,
                "message status rolled up"
            );
            Self::record_rollups(&[summary]);
        }
        publish_after_commit(state.fanout.as_ref(), events).await;
        Ok(())
    }

    /// Every participant's row for one message
    pub async fn list(
        state: &AppState,
        conversation_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Vec<StatusRow>> {
        let mut tx = state.store.begin().await?;
        if !tx.is_participant(conversation_id, user_id).await? {
            return Err(AppError::Unauthorized);
        }
        if tx.lock_message(conversation_id, message_id).await?.is_none() {
            return Err(AppError::NotFound);
        }
        let rows = tx.list_statuses(message_id).await?;
        tx.commit().await?;
        Ok(rows)
    }
}
