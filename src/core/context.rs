use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::database::{EventLog, MemoryStore, PgStore, PoolStatus, SubscriptionStore};
use crate::errors::{Error, Result};
use crate::models::event::validate_channel;
use crate::models::{Event, EventId, NewEvent};
use crate::realtime::{
    ConnectionRegistry, DistributionEngine, EngineConfig, HeartbeatConfig, HeartbeatDriver,
    SubscribeRequest, Subscription,
};

/// Largest page `history` returns.
pub const MAX_HISTORY_LIMIT: usize = 1000;
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Process-wide context: the registry, the engine on top of it, the
/// heartbeat driver and the stores. Built once at startup and shut down
/// explicitly.
pub struct EventHub {
    engine: DistributionEngine,
    heartbeat: HeartbeatDriver,
    events: Arc<dyn EventLog>,
    subscriptions: Arc<dyn SubscriptionStore>,
    pg: Option<PgStore>,
}

impl EventHub {
    pub fn new(
        events: Arc<dyn EventLog>,
        subscriptions: Arc<dyn SubscriptionStore>,
        engine_config: EngineConfig,
        heartbeat_config: HeartbeatConfig,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let engine = DistributionEngine::new(
            registry.clone(),
            events.clone(),
            subscriptions.clone(),
            engine_config,
        );
        Self {
            engine,
            heartbeat: HeartbeatDriver::new(registry, heartbeat_config),
            events,
            subscriptions,
            pg: None,
        }
    }

    /// Hub backed by a single in-memory store.
    pub fn in_memory(engine_config: EngineConfig, heartbeat_config: HeartbeatConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::new(store.clone(), store, engine_config, heartbeat_config)
    }

    /// Build the hub from process configuration, connecting to PostgreSQL
    /// and creating the schema when a database URL is set.
    pub async fn connect(config: &Config) -> Result<Self> {
        let Some(pool_config) = config.pool_config() else {
            warn!("DATABASE_URL not set, events and memberships are kept in memory");
            return Ok(Self::in_memory(
                config.engine_config(),
                config.heartbeat_config(),
            ));
        };

        let store = PgStore::from_config(&pool_config)?;
        store.migrate().await?;
        let status = store.status();
        info!(
            max_size = status.max_size,
            size = status.size,
            "Connected to PostgreSQL"
        );

        let shared = Arc::new(store.clone());
        let mut hub = Self::new(
            shared.clone(),
            shared,
            config.engine_config(),
            config.heartbeat_config(),
        );
        hub.pg = Some(store);
        Ok(hub)
    }

    pub fn engine(&self) -> &DistributionEngine {
        &self.engine
    }

    pub fn heartbeat(&self) -> &HeartbeatDriver {
        &self.heartbeat
    }

    pub fn pool_status(&self) -> Option<PoolStatus> {
        self.pg.as_ref().map(PgStore::status)
    }

    pub fn start(&self) {
        self.heartbeat.start();
    }

    /// Stop the heartbeat, end every stream and release the pool.
    pub async fn shutdown(&self) {
        self.heartbeat.stop().await;
        let closed = self.engine.close_all();
        if let Some(pg) = &self.pg {
            pg.close();
        }
        info!(closed_connections = closed, "Event hub shut down");
    }

    pub async fn publish(&self, event: NewEvent) -> Result<Event> {
        self.engine.publish_new(event).await
    }

    pub async fn open_stream(&self, request: SubscribeRequest) -> Result<Subscription> {
        self.engine.subscribe(request).await
    }

    pub fn connection_count(&self) -> usize {
        self.engine.connection_count()
    }

    /// A page of a channel's stored events, ascending by id.
    pub async fn history(
        &self,
        channel: &str,
        after: Option<EventId>,
        limit: Option<usize>,
    ) -> Result<Vec<Event>> {
        validate_channel(channel)?;
        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        Ok(self.events.history(channel, after, limit).await?)
    }

    pub async fn add_membership(&self, user_id: &str, channel: &str) -> Result<bool> {
        validate_membership(user_id, channel)?;
        let added = self.subscriptions.add(user_id, channel).await?;
        info!(user_id, channel, added, "Membership added");
        Ok(added)
    }

    /// Existing streams keep the channel until they reconnect.
    pub async fn remove_membership(&self, user_id: &str, channel: &str) -> Result<bool> {
        validate_membership(user_id, channel)?;
        let removed = self.subscriptions.remove(user_id, channel).await?;
        info!(user_id, channel, removed, "Membership removed");
        Ok(removed)
    }

    pub async fn memberships(&self, user_id: &str) -> Result<Vec<String>> {
        if user_id.is_empty() {
            return Err(Error::validation("userId is required"));
        }
        Ok(self.subscriptions.list_channels(user_id).await?)
    }
}

fn validate_membership(user_id: &str, channel: &str) -> Result<()> {
    if user_id.is_empty() {
        return Err(Error::validation("userId is required"));
    }
    validate_channel(channel)
}
