use crate::{
    config::Config,
    repository::MessagingStore,
    services::{ModerationGate, UserDirectory},
    websocket::{ConnectionRegistry, RealtimeFanout},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn MessagingStore>,
    /// Best-effort push; never consulted for correctness
    pub fanout: Arc<dyn RealtimeFanout>,
    pub users: Arc<dyn UserDirectory>,
    pub moderation: Arc<dyn ModerationGate>,
    /// Live WebSocket sessions on this instance
    pub registry: ConnectionRegistry,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn MessagingStore>,
        fanout: Arc<dyn RealtimeFanout>,
        users: Arc<dyn UserDirectory>,
        moderation: Arc<dyn ModerationGate>,
        registry: ConnectionRegistry,
    ) -> Self {
        Self {
            config,
            store,
            fanout,
            users,
            moderation,
            registry,
        }
    }
}
