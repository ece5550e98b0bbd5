use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{ConversationUpdate, DeliveryStatus, Message, MessageDraft, MessagePage};
use crate::services::status_tracker::StatusTracker;
use crate::services::unread_counter::UnreadCounter;
use crate::state::AppState;
use crate::websocket::events::{FanoutEvent, PendingEvents};
use crate::websocket::fanout::publish_after_commit;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub struct MessageService;

impl MessageService {
    /// Persist a message and notify every participant.
    ///
    /// Insert, conversation bump, status seeding and unread increments share one
    /// transaction. The push goes out only after it commits.
    pub async fn send(
        state: &AppState,
        conversation_id: Uuid,
        sender_id: Uuid,
        draft: MessageDraft,
    ) -> AppResult<Message> {
        let draft = draft.validate()?;

        if let Some(text) = draft.text.as_deref() {
            let verdict = state.moderation.check(text).await?;
            if verdict.flagged {
                return Err(AppError::InvalidInput(
                    verdict
                        .reason
                        .unwrap_or_else(|| "Message rejected by moderation".to_string()),
                ));
            }
        }

        let now = Utc::now();
        let mut tx = state.store.begin().await?;
        if !tx.is_participant(conversation_id, sender_id).await? {
            return Err(AppError::Unauthorized);
        }

        let is_encrypted = tx.active_cord(conversation_id).await?.is_some();
        let message = Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            text: draft.text,
            image_url: draft.image_url,
            video_url: draft.video_url,
            metadata: draft.metadata,
            is_encrypted,
            status: DeliveryStatus::Sent,
            created_at: now,
            delete_at: None,
        };
        tx.insert_message(&message).await?;
        tx.update_conversation(
            conversation_id,
            &ConversationUpdate {
                updated_at: Some(now),
                last_message_at: Some(now),
                ..Default::default()
            },
        )
        .await?;

        let participants = tx.participant_ids(conversation_id).await?;
        StatusTracker::seed(tx.as_mut(), &message, &participants).await?;
        UnreadCounter::increment(tx.as_mut(), conversation_id, sender_id).await?;
        tx.commit().await?;

        metrics::MESSAGES_SENT_TOTAL.inc();
        tracing::debug!(
            conversation_id = %conversation_id,
            message_id = %message.id,
            sender_id = %sender_id,
            is_encrypted,
            "message stored"
        );

        let sender_name = state.users.display_name(sender_id).await;
        let mut events = PendingEvents::new();
        for participant in participants {
            events.push(
                participant,
                FanoutEvent::NewMessage {
                    conversation_id,
                    message: message.clone(),
                    sender_name: sender_name.clone(),
                },
            );
        }
        publish_after_commit(state.fanout.as_ref(), events).await;

        Ok(message)
    }

    /// Ascending page ending before `before`. Expired messages are hidden.
    pub async fn list(
        state: &AppState,
        conversation_id: Uuid,
        user_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: Option<i64>,
    ) -> AppResult<Vec<Message>> {
        let page = MessagePage {
            before,
            limit: state.config.page_limit(limit),
        };

        let mut tx = state.store.begin().await?;
        if !tx.is_participant(conversation_id, user_id).await? {
            return Err(AppError::Unauthorized);
        }
        let messages = tx.list_messages(conversation_id, page, Utc::now()).await?;
        tx.commit().await?;
        Ok(messages)
    }
}
