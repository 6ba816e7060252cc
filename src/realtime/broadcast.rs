use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use xxhash_rust::xxh3::xxh3_64;

use super::connection::{Connection, ConnectionStream};
use super::frame::Frame;
use super::registry::ConnectionRegistry;
use super::replay;
use crate::database::{EventLog, SubscriptionStore};
use crate::errors::{Error, Result};
use crate::models::event::validate_channel;
use crate::models::{Event, EventId, NewEvent};

/// Configuration for the distribution engine
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Frames a connection may have queued before it counts as dead
    pub sink_buffer_size: usize,
    /// Broadcasts held per connection while it replays
    pub replay_buffer_limit: usize,
    /// Number of publish locks channels are hashed onto
    pub publish_lock_stripes: usize,
    /// Reconnect delay hint written at the start of every stream
    pub sse_retry_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sink_buffer_size: 1024,
            replay_buffer_limit: 10_000,
            publish_lock_stripes: 64,
            sse_retry_ms: None,
        }
    }
}

/// Statistics for broadcast operations
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Events handed to the engine
    pub total_published: u64,
    /// Frames accepted by connection sinks
    pub total_delivered: u64,
    /// Connections dropped after a failed write
    pub total_failed: u64,
    /// Current (channel, connection) attachments
    pub active_subscribers: usize,
    /// Channels with at least one connection
    pub channel_count: usize,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Append+broadcast is serialized per channel so broadcast order matches id
/// order. Channels share a fixed set of locks instead of one lock each.
struct PublishLocks {
    stripes: Box<[Mutex<()>]>,
}

impl PublishLocks {
    fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    fn for_channel(&self, channel: &str) -> &Mutex<()> {
        let slot = xxh3_64(channel.as_bytes()) % self.stripes.len() as u64;
        &self.stripes[slot as usize]
    }
}

/// A request to open a stream.
#[derive(Clone, Debug)]
pub struct SubscribeRequest {
    pub user_id: String,
    pub channels: Vec<String>,
    pub last_seen_id: Option<EventId>,
}

impl SubscribeRequest {
    pub fn new(user_id: impl Into<String>, channels: Vec<String>) -> Self {
        Self {
            user_id: user_id.into(),
            channels,
            last_seen_id: None,
        }
    }

    pub fn resume_after(mut self, last_seen_id: EventId) -> Self {
        self.last_seen_id = Some(last_seen_id);
        self
    }
}

/// An opened stream.
pub struct Subscription {
    pub stream: ConnectionStream,
    /// Requested channels the user is not a member of.
    pub rejected: Vec<String>,
}

impl Subscription {
    pub fn connection(&self) -> &Arc<Connection> {
        self.stream.connection()
    }
}

/// Routes persisted events to attached connections and onboards new ones.
#[derive(Clone)]
pub struct DistributionEngine {
    registry: Arc<ConnectionRegistry>,
    events: Arc<dyn EventLog>,
    subscriptions: Arc<dyn SubscriptionStore>,
    publish_locks: Arc<PublishLocks>,
    counters: Arc<Counters>,
    closed: Arc<AtomicBool>,
    config: EngineConfig,
}

impl DistributionEngine {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        events: Arc<dyn EventLog>,
        subscriptions: Arc<dyn SubscriptionStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            events,
            subscriptions,
            publish_locks: Arc::new(PublishLocks::new(config.publish_lock_stripes)),
            counters: Arc::new(Counters::default()),
            closed: Arc::new(AtomicBool::new(false)),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Append an event to the log and broadcast it. Nothing is broadcast if
    /// the append fails.
    pub async fn publish_new(&self, event: NewEvent) -> Result<Event> {
        event.validate()?;

        let _ordered = self.publish_locks.for_channel(&event.channel).lock().await;
        let stored = self.events.append(event).await.map_err(|err| {
            error!(error = %err, "Failed to append event");
            Error::from(err)
        })?;
        let delivered = self.publish(&stored);

        debug!(
            event_id = stored.id,
            channel = %stored.channel,
            event_type = %stored.event_type,
            delivered,
            "Event published"
        );
        Ok(stored)
    }

    /// Broadcast an already stored event to the connections attached to its
    /// channel. Returns how many connections accepted the frame.
    pub fn publish(&self, event: &Event) -> usize {
        self.counters.published.fetch_add(1, Ordering::Relaxed);

        let targets = self.registry.snapshot(&event.channel);
        if targets.is_empty() {
            return 0;
        }

        let frame = Frame::event(event);
        let mut delivered = 0;
        for connection in &targets {
            match connection.deliver(&frame) {
                Ok(()) => delivered += 1,
                Err(source) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    self.registry.evict_failed(connection, source, "broadcast");
                }
            }
        }

        self.counters
            .delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    /// Open a stream for a user on the channels they are a member of,
    /// replaying missed events first when `last_seen_id` is given.
    pub async fn subscribe(&self, request: SubscribeRequest) -> Result<Subscription> {
        let SubscribeRequest {
            user_id,
            channels,
            last_seen_id,
        } = request;

        if self.is_closed() {
            return Err(Error::ShuttingDown);
        }
        if user_id.is_empty() {
            return Err(Error::validation("userId is required"));
        }
        let requested = normalize_channels(channels)?;

        let authorized = self
            .subscriptions
            .authorized_channels(&user_id, &requested)
            .await?;
        if authorized.is_empty() {
            warn!(
                user_id = %user_id,
                channels = ?requested,
                "Stream rejected, no memberships"
            );
            return Err(Error::Forbidden);
        }
        let rejected: Vec<String> = requested
            .into_iter()
            .filter(|channel| !authorized.contains(channel))
            .collect();

        let (connection, receiver) = Connection::new(
            user_id,
            authorized,
            self.config.sink_buffer_size,
            last_seen_id.map(|_| self.config.replay_buffer_limit),
        );
        let stream =
            ConnectionStream::new(receiver, connection.clone(), self.registry.clone());

        if let Some(retry_ms) = self.config.sse_retry_ms {
            if let Err(err) = connection.write_now(&Frame::retry(retry_ms)) {
                debug!(
                    connection_id = %connection.id(),
                    error = %err,
                    "Retry hint not written"
                );
            }
        }

        for channel in connection.channels() {
            self.registry.attach(channel, &connection);
        }
        // close_all may have drained the registry while the membership query
        // was in flight.
        if self.is_closed() {
            self.registry.evict(&connection);
            return Err(Error::ShuttingDown);
        }

        info!(
            connection_id = %connection.id(),
            user_id = %connection.user_id(),
            channels = ?connection.channels(),
            rejected = ?rejected,
            last_seen_id,
            "Stream opened"
        );

        if let Some(last_seen_id) = last_seen_id {
            let backlog =
                match replay::backlog(self.events.as_ref(), connection.channels(), last_seen_id)
                    .await
                {
                    Ok(backlog) => backlog,
                    Err(err) => {
                        error!(
                            connection_id = %connection.id(),
                            error = %err,
                            "Replay query failed"
                        );
                        self.registry.evict(&connection);
                        return Err(err.into());
                    }
                };

            let registry = self.registry.clone();
            let connection = connection.clone();
            tokio::spawn(async move {
                match replay::run(&connection, backlog).await {
                    Ok(outcome) => debug!(
                        connection_id = %connection.id(),
                        replayed = outcome.replayed,
                        flushed = outcome.flushed,
                        skipped = outcome.skipped,
                        "Replay complete, connection live"
                    ),
                    Err(source) => registry.evict_failed(&connection, source, "replay"),
                }
            });
        }

        Ok(Subscription { stream, rejected })
    }

    /// Detach a connection from all of its channels and release its sink.
    /// Safe to call more than once.
    pub fn unsubscribe(&self, connection: &Connection) -> bool {
        let closed = self.registry.evict(connection);
        if closed {
            info!(
                connection_id = %connection.id(),
                user_id = %connection.user_id(),
                "Stream closed"
            );
        }
        closed
    }

    pub fn connection_count(&self) -> usize {
        self.registry.count()
    }

    /// Close every connection and refuse new ones. Used at shutdown.
    pub fn close_all(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        let connections = self.registry.drain();
        for connection in &connections {
            connection.close();
        }
        connections.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            total_published: self.counters.published.load(Ordering::Relaxed),
            total_delivered: self.counters.delivered.load(Ordering::Relaxed),
            total_failed: self.counters.failed.load(Ordering::Relaxed),
            active_subscribers: self.registry.count(),
            channel_count: self.registry.channel_count(),
        }
    }
}

/// Validate requested channel names and drop duplicates, keeping order.
fn normalize_channels(channels: Vec<String>) -> Result<Vec<String>> {
    let mut seen = ahash::AHashSet::with_capacity(channels.len());
    let mut normalized = Vec::with_capacity(channels.len());
    for channel in channels {
        let channel = channel.trim().to_string();
        if channel.is_empty() {
            continue;
        }
        validate_channel(&channel)?;
        if seen.insert(channel.clone()) {
            normalized.push(channel);
        }
    }
    if normalized.is_empty() {
        return Err(Error::validation("at least one channel is required"));
    }
    Ok(normalized)
}
