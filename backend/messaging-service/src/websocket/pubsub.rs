use crate::websocket::ConnectionRegistry;
use futures::StreamExt;
use redis::Client;
use std::time::Duration;
use uuid::Uuid;

const USER_CHANNEL_PREFIX: &str = "messaging:user:";

pub fn channel_for_user(id: Uuid) -> String {
    format!("{USER_CHANNEL_PREFIX}{id}")
}

pub fn user_from_channel(channel: &str) -> Option<Uuid> {
    channel
        .strip_prefix(USER_CHANNEL_PREFIX)
        .and_then(|rest| Uuid::parse_str(rest).ok())
}

/// Forward every `messaging:user:*` publication into the local registry.
/// Returns when the subscription stream ends.
pub async fn start_user_listener(client: Client, registry: ConnectionRegistry) -> redis::RedisResult<()> {
    // PubSub requires a dedicated connection, not multiplexed
    let conn = client.get_async_connection().await?;
    let mut pubsub = conn.into_pubsub();
    pubsub.psubscribe(format!("{USER_CHANNEL_PREFIX}*")).await?;
    tracing::info!("subscribed to per-user fanout channels");

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let channel = msg.get_channel_name().to_string();
        let payload: String = match msg.get_payload() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, channel = %channel, "dropping undecodable fanout payload");
                continue;
            }
        };
        if let Some(user_id) = user_from_channel(&channel) {
            registry.send_to_user(user_id, payload).await;
        }
    }
    Ok(())
}

/// Keep the listener alive across Redis disconnects.
pub async fn run_user_listener(client: Client, registry: ConnectionRegistry) {
    let mut backoff = Duration::from_secs(1);
    loop {
        match start_user_listener(client.clone(), registry.clone()).await {
            Ok(()) => {
                tracing::warn!("fanout subscription closed; resubscribing");
                backoff = Duration::from_secs(1);
            }
            Err(e) => {
                tracing::error!(error = %e, retry_in_secs = backoff.as_secs(), "fanout listener failed");
            }
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(Duration::from_secs(30));
    }
}
