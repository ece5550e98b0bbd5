use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use uuid::Uuid;

pub mod events;
pub mod fanout;
pub mod message_types;
pub mod pubsub;

pub use events::FanoutEvent;
pub use fanout::{LocalFanout, NoopFanout, RealtimeFanout, RedisFanout};

/// Unique identifier for a WebSocket subscriber
///
/// Each connection gets its own id so that closing one device does not
/// unregister the user's other devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

struct Subscriber {
    id: SubscriberId,
    sender: UnboundedSender<String>,
}

/// Live connections on this instance, keyed by user id
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<Uuid, Vec<Subscriber>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_subscriber(&self, user_id: Uuid) -> (SubscriberId, UnboundedReceiver<String>) {
        let (tx, rx) = unbounded_channel();
        let subscriber_id = SubscriberId::new();

        let mut guard = self.inner.write().await;
        let subscribers = guard.entry(user_id).or_default();
        subscribers.push(Subscriber {
            id: subscriber_id,
            sender: tx,
        });

        tracing::debug!(
            user_id = %user_id,
            subscriber = ?subscriber_id,
            connections = subscribers.len(),
            "registered websocket subscriber"
        );

        (subscriber_id, rx)
    }

    /// Must be called when a connection closes.
    pub async fn remove_subscriber(&self, user_id: Uuid, subscriber_id: SubscriberId) {
        let mut guard = self.inner.write().await;

        if let Some(subscribers) = guard.get_mut(&user_id) {
            subscribers.retain(|s| s.id != subscriber_id);
            if subscribers.is_empty() {
                guard.remove(&user_id);
            }
        }
    }

    /// Deliver to every connection of the user. Dead senders are pruned.
    /// Returns the number of connections that accepted the payload.
    pub async fn send_to_user(&self, user_id: Uuid, payload: String) -> usize {
        let mut guard = self.inner.write().await;
        let Some(subscribers) = guard.get_mut(&user_id) else {
            return 0;
        };

        subscribers.retain(|s| s.sender.send(payload.clone()).is_ok());
        let delivered = subscribers.len();
        if subscribers.is_empty() {
            guard.remove(&user_id);
        }
        delivered
    }

    pub async fn subscriber_count(&self, user_id: Uuid) -> usize {
        let guard = self.inner.read().await;
        guard.get(&user_id).map(|v| v.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_every_connection_of_user() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (_, mut rx1) = registry.add_subscriber(user).await;
        let (_, mut rx2) = registry.add_subscriber(user).await;

        assert_eq!(registry.send_to_user(user, "hello".into()).await, 2);
        assert_eq!(rx1.recv().await.as_deref(), Some("hello"));
        assert_eq!(rx2.recv().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn unknown_user_receives_nothing() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.send_to_user(Uuid::new_v4(), "x".into()).await, 0);
    }

    #[tokio::test]
    async fn closed_receivers_are_pruned() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (_, rx) = registry.add_subscriber(user).await;
        drop(rx);

        assert_eq!(registry.send_to_user(user, "x".into()).await, 0);
        assert_eq!(registry.subscriber_count(user).await, 0);
    }

    #[tokio::test]
    async fn remove_only_drops_that_connection() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (first, _rx1) = registry.add_subscriber(user).await;
        let (_, _rx2) = registry.add_subscriber(user).await;

        registry.remove_subscriber(user, first).await;
        assert_eq!(registry.subscriber_count(user).await, 1);
    }
}
