//! Realtime fanout bus.
//!
//! Store functions never publish directly: they stage [`PendingEvents`] and
//! callers hand them to [`publish_after_commit`] once the transaction is
//! durable. Delivery is best-effort. Failures are logged, counted and dropped.

use super::events::{FanoutEvent, PendingEvents};
use super::pubsub;
use super::ConnectionRegistry;
use crate::metrics;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum FanoutError {
    #[error("failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to publish to redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("fanout unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait RealtimeFanout: Send + Sync {
    async fn publish(&self, user_id: Uuid, event: &FanoutEvent) -> Result<(), FanoutError>;
}

/// Single-instance bus: writes straight into this process's registry
#[derive(Clone)]
pub struct LocalFanout {
    registry: ConnectionRegistry,
}

impl LocalFanout {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl RealtimeFanout for LocalFanout {
    async fn publish(&self, user_id: Uuid, event: &FanoutEvent) -> Result<(), FanoutError> {
        let payload = event.to_payload()?;
        let delivered = self.registry.send_to_user(user_id, payload).await;
        tracing::debug!(
            user_id = %user_id,
            event = event.event_type(),
            delivered,
            "local fanout"
        );
        Ok(())
    }
}

/// Cross-instance bus over Redis pub/sub. Every instance runs
/// [`pubsub::run_user_listener`] to forward into its own registry.
#[derive(Clone)]
pub struct RedisFanout {
    conn: ConnectionManager,
}

impl RedisFanout {
    pub async fn connect(client: redis::Client) -> redis::RedisResult<Self> {
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl RealtimeFanout for RedisFanout {
    async fn publish(&self, user_id: Uuid, event: &FanoutEvent) -> Result<(), FanoutError> {
        let payload = event.to_payload()?;
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(pubsub::channel_for_user(user_id), payload)
            .await?;
        Ok(())
    }
}

#[derive(Clone, Copy, Default)]
pub struct NoopFanout;

#[async_trait]
impl RealtimeFanout for NoopFanout {
    async fn publish(&self, _user_id: Uuid, _event: &FanoutEvent) -> Result<(), FanoutError> {
        Ok(())
    }
}

/// Publish staged events. Never fails and never retries.
pub async fn publish_after_commit(fanout: &dyn RealtimeFanout, events: PendingEvents) {
    for (recipient, event) in events.into_inner() {
        if let Err(e) = fanout.publish(recipient, &event).await {
            metrics::FANOUT_FAILURES_TOTAL
                .with_label_values(&[event.event_type()])
                .inc();
            tracing::warn!(
                error = %e,
                recipient = %recipient,
                conversation_id = %event.conversation_id(),
                event = event.event_type(),
                "realtime fanout failed; clients will converge by polling"
            );
        }
    }
}
