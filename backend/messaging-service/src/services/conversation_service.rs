use crate::error::{AppError, AppResult};
use crate::models::{dedup_key, Conversation, ConversationSummary, ConversationUpdate, CordMode, EncryptedCord};
use crate::state::AppState;
use chrono::Utc;
use uuid::Uuid;

pub struct ConversationService;

impl ConversationService {
    /// Get or create the 1:1 conversation between two users.
    ///
    /// Plain and encrypted conversations between the same pair are distinct.
    /// `timer` is only used when a new encrypted conversation is created.
    pub async fn get_or_create(
        state: &AppState,
        user_a: Uuid,
        user_b: Uuid,
        mode: CordMode,
        timer: Option<i32>,
    ) -> AppResult<Uuid> {
        if user_a == user_b {
            return Err(AppError::InvalidInput(
                "Cannot start a conversation with yourself".into(),
            ));
        }
        Self::get_or_create_for(state, user_a, &[user_a, user_b], mode, timer).await
    }

    /// Resolve the peer through the user directory, then [`Self::get_or_create`].
    pub async fn get_or_create_with_username(
        state: &AppState,
        caller: Uuid,
        peer_username: &str,
        mode: CordMode,
        timer: Option<i32>,
    ) -> AppResult<Uuid> {
        let peer = state
            .users
            .find_by_username(peer_username)
            .await?
            .ok_or(AppError::NotFound)?;
        Self::get_or_create(state, caller, peer.id, mode, timer).await
    }

    /// Group conversation. Deduplicated on the unordered member set + mode.
    pub async fn create_group(
        state: &AppState,
        creator: Uuid,
        members: &[Uuid],
        mode: CordMode,
        timer: Option<i32>,
    ) -> AppResult<Uuid> {
        let mut participants: Vec<Uuid> = members.to_vec();
        participants.push(creator);
        participants.sort();
        participants.dedup();
        if participants.len() < 2 {
            return Err(AppError::InvalidInput(
                "A conversation needs at least two distinct participants".into(),
            ));
        }
        Self::get_or_create_for(state, creator, &participants, mode, timer).await
    }

    async fn get_or_create_for(
        state: &AppState,
        creator: Uuid,
        participants: &[Uuid],
        mode: CordMode,
        timer: Option<i32>,
    ) -> AppResult<Uuid> {
        let timer = match mode {
            CordMode::Encrypted => Some(state.config.resolve_timer(timer)?),
            CordMode::Plain => None,
        };
        let key = dedup_key(participants, mode);

        let mut tx = state.store.begin().await?;
        if let Some(existing) = tx.find_conversation_by_key(&key).await? {
            return Ok(existing);
        }

        let now = Utc::now();
        let conversation = Conversation::new(creator, key.clone(), now);
        if !tx.insert_conversation(&conversation).await? {
            // A concurrent creator committed the same key first
            return tx.find_conversation_by_key(&key).await?.ok_or_else(|| {
                AppError::Internal(format!("dedup key {key} conflicted but has no owner"))
            });
        }

        for &user_id in participants {
            tx.insert_participant(conversation.id, user_id, now).await?;
        }
        if let Some(self_destruct_timer) = timer {
            tx.insert_cord(&EncryptedCord {
                conversation_id: conversation.id,
                is_active: true,
                self_destruct_timer,
                created_at: now,
            })
            .await?;
        }
        tx.commit().await?;

        tracing::info!(
            conversation_id = %conversation.id,
            created_by = %creator,
            participants = participants.len(),
            mode = mode.as_str(),
            "conversation created"
        );
        Ok(conversation.id)
    }

    /// Add `user_id` to a conversation the actor already belongs to.
    ///
    /// Returns `false` when the user was already a participant. The new member
    /// only tracks messages sent after joining.
    pub async fn add_participant(
        state: &AppState,
        conversation_id: Uuid,
        actor: Uuid,
        user_id: Uuid,
    ) -> AppResult<bool> {
        let now = Utc::now();
        let mut tx = state.store.begin().await?;
        if !tx.is_participant(conversation_id, actor).await? {
            return Err(AppError::Unauthorized);
        }
        if !tx.insert_participant(conversation_id, user_id, now).await? {
            return Ok(false);
        }

        let members = tx.participant_ids(conversation_id).await?;
        let mode = CordMode::from_flag(tx.active_cord(conversation_id).await?.is_some());
        let key = dedup_key(&members, mode);
        let new_key = match tx.find_conversation_by_key(&key).await? {
            Some(other) if other != conversation_id => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    other = %other,
                    "participant set already owned by another conversation; clearing dedup key"
                );
                None
            }
            _ => Some(key),
        };
        tx.update_conversation(
            conversation_id,
            &ConversationUpdate {
                updated_at: Some(now),
                dedup_key: Some(new_key),
                ..Default::default()
            },
        )
        .await?;
        tx.commit().await?;

        tracing::info!(
            conversation_id = %conversation_id,
            added = %user_id,
            by = %actor,
            "participant added"
        );
        Ok(true)
    }

    pub async fn add_participant_by_username(
        state: &AppState,
        conversation_id: Uuid,
        actor: Uuid,
        username: &str,
    ) -> AppResult<bool> {
        Self::ensure_participant(state, conversation_id, actor).await?;
        let user = state
            .users
            .find_by_username(username)
            .await?
            .ok_or(AppError::NotFound)?;
        Self::add_participant(state, conversation_id, actor, user.id).await
    }

    /// Authorization gate. Absence is always `Unauthorized`.
    pub async fn ensure_participant(
        state: &AppState,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<()> {
        let mut tx = state.store.begin().await?;
        let member = tx.is_participant(conversation_id, user_id).await?;
        tx.commit().await?;
        if member {
            Ok(())
        } else {
            Err(AppError::Unauthorized)
        }
    }

    pub async fn list_for(state: &AppState, user_id: Uuid) -> AppResult<Vec<ConversationSummary>> {
        let mut tx = state.store.begin().await?;
        let conversations = tx.list_conversations_for(user_id).await?;
        tx.commit().await?;
        Ok(conversations)
    }
}
