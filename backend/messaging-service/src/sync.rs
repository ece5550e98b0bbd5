//! Client-side convergence.
//!
//! A [`SyncClient`] keeps a [`Timeline`] of one conversation in step with the
//! store by polling. Fanout payloads are applied optimistically and trigger an
//! early poll, but the poll result always wins. Dropping every push still
//! converges.

use crate::error::AppResult;
use crate::models::{DeliveryStatus, Message};
use crate::services::MessageService;
use crate::state::AppState;
use crate::websocket::FanoutEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

type TimelineKey = (DateTime<Utc>, Uuid);

/// Messages ordered by `(created_at, id)`, merged idempotently by id
#[derive(Debug, Default, Clone)]
pub struct Timeline {
    messages: BTreeMap<TimelineKey, Message>,
    index: HashMap<Uuid, TimelineKey>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh messages. A refresh never moves status backwards.
    /// Returns how many messages were new.
    pub fn merge(&mut self, batch: impl IntoIterator<Item = Message>) -> usize {
        let mut added = 0;
        for incoming in batch {
            match self.index.get(&incoming.id) {
                Some(key) => {
                    if let Some(existing) = self.messages.get_mut(key) {
                        let status = existing.status.max(incoming.status);
                        *existing = incoming;
                        existing.status = status;
                    }
                }
                None => {
                    let key = (incoming.created_at, incoming.id);
                    self.index.insert(incoming.id, key);
                    self.messages.insert(key, incoming);
                    added += 1;
                }
            }
        }
        added
    }

    /// Returns `true` when the status moved forward.
    pub fn apply_status(&mut self, message_id: Uuid, status: DeliveryStatus) -> bool {
        let Some(key) = self.index.get(&message_id) else {
            return false;
        };
        match self.messages.get_mut(key) {
            Some(message) if message.status.advances_to(status) => {
                message.status = status;
                true
            }
            _ => false,
        }
    }

    pub fn apply_event(&mut self, event: &FanoutEvent) -> bool {
        match event {
            FanoutEvent::NewMessage { message, .. } => self.merge([message.clone()]) > 0,
            FanoutEvent::MessageStatusUpdate {
                message_id, status, ..
            } => self.apply_status(*message_id, *status),
        }
    }

    /// Treat `page` as the authoritative newest window: anything at or after
    /// its oldest entry that the store no longer returns is dropped. An empty
    /// page empties the timeline.
    pub fn reconcile_window(&mut self, page: Vec<Message>) -> usize {
        let floor = page.first().map(|m| (m.created_at, m.id));
        let live: HashSet<Uuid> = page.iter().map(|m| m.id).collect();

        let stale: Vec<TimelineKey> = self
            .messages
            .keys()
            .filter(|key| floor.map_or(true, |floor| **key >= floor) && !live.contains(&key.1))
            .copied()
            .collect();
        for key in &stale {
            self.messages.remove(key);
            self.index.remove(&key.1);
        }

        self.merge(page)
    }

    pub fn prune_expired(&mut self, now: DateTime<Utc>) -> usize {
        let expired: Vec<TimelineKey> = self
            .messages
            .iter()
            .filter(|(_, m)| m.is_expired(now))
            .map(|(key, _)| *key)
            .collect();
        for key in &expired {
            self.messages.remove(key);
            self.index.remove(&key.1);
        }
        expired.len()
    }

    pub fn get(&self, message_id: Uuid) -> Option<&Message> {
        self.index
            .get(&message_id)
            .and_then(|key| self.messages.get(key))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.values()
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.messages.keys().map(|(_, id)| *id).collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Where a client reads the authoritative message list from
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn fetch(
        &self,
        conversation_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: i64,
    ) -> AppResult<Vec<Message>>;
}

/// In-process source backed by the message list endpoint's service call
pub struct StoreMessageSource {
    state: AppState,
    user_id: Uuid,
}

impl StoreMessageSource {
    pub fn new(state: AppState, user_id: Uuid) -> Self {
        Self { state, user_id }
    }
}

#[async_trait]
impl MessageSource for StoreMessageSource {
    async fn fetch(
        &self,
        conversation_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: i64,
    ) -> AppResult<Vec<Message>> {
        MessageService::list(&self.state, conversation_id, self.user_id, before, Some(limit)).await
    }
}

pub struct SyncClient<S> {
    source: S,
    conversation_id: Uuid,
    page_limit: i64,
    timeline: Timeline,
}

impl<S: MessageSource> SyncClient<S> {
    pub fn new(source: S, conversation_id: Uuid, page_limit: i64) -> Self {
        Self {
            source,
            conversation_id,
            page_limit,
            timeline: Timeline::new(),
        }
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// Fetch the newest page and reconcile. Returns the number of new messages.
    pub async fn poll_once(&mut self) -> AppResult<usize> {
        let page = self
            .source
            .fetch(self.conversation_id, None, self.page_limit)
            .await?;
        self.timeline.prune_expired(Utc::now());
        Ok(self.timeline.reconcile_window(page))
    }

    /// Apply a pushed payload. Events for other conversations are ignored.
    pub fn on_payload(&mut self, payload: &str) -> bool {
        match FanoutEvent::from_payload(payload) {
            Ok(event) if event.conversation_id() == self.conversation_id => {
                self.timeline.apply_event(&event)
            }
            Ok(_) => false,
            Err(e) => {
                tracing::debug!(error = %e, "ignoring undecodable push payload");
                false
            }
        }
    }

    async fn poll_logged(&mut self) {
        if let Err(e) = self.poll_once().await {
            tracing::warn!(
                error = %e,
                conversation_id = %self.conversation_id,
                "sync poll failed; retrying next tick"
            );
        }
    }

    /// Poll every `interval`, and early whenever a push arrives. A closed push
    /// channel just leaves the timer. Returns the final timeline on shutdown.
    pub async fn run(
        mut self,
        interval: Duration,
        mut pushes: mpsc::UnboundedReceiver<String>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Timeline {
        let mut ticker = tokio::time::interval(interval);
        let mut pushes_open = true;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.poll_logged().await,
                payload = pushes.recv(), if pushes_open => match payload {
                    Some(payload) => {
                        self.on_payload(&payload);
                        self.poll_logged().await;
                    }
                    None => pushes_open = false,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.timeline
    }
}
