//! Durable collaborators of the distribution engine.
//!
//! The engine only sees the [`EventLog`] and [`SubscriptionStore`] traits.
//! [`PgStore`] backs both with PostgreSQL; [`MemoryStore`] keeps everything in
//! process for tests and database-less runs.

pub mod memory;
pub mod pool;
pub mod postgres;

use async_trait::async_trait;

use crate::errors::StoreError;
use crate::models::{Event, EventId, NewEvent};

pub use memory::MemoryStore;
pub use pool::{PoolConfig, PoolStatus};
pub use postgres::PgStore;

/// Append-only event log with monotonically increasing ids.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Persist an event and return it with its assigned id.
    async fn append(&self, event: NewEvent) -> Result<Event, StoreError>;

    /// Events on any of `channels` with `id > after`, ascending by id.
    async fn events_after(
        &self,
        channels: &[String],
        after: EventId,
    ) -> Result<Vec<Event>, StoreError>;

    /// One page of a channel's history, ascending by id.
    async fn history(
        &self,
        channel: &str,
        after: Option<EventId>,
        limit: usize,
    ) -> Result<Vec<Event>, StoreError>;
}

/// Durable (user, channel) memberships.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Record a membership. Returns `false` if it already existed.
    async fn add(&self, user_id: &str, channel: &str) -> Result<bool, StoreError>;

    /// Remove a membership. Returns `false` if there was none.
    async fn remove(&self, user_id: &str, channel: &str) -> Result<bool, StoreError>;

    async fn is_subscribed(&self, user_id: &str, channel: &str) -> Result<bool, StoreError>;

    async fn list_channels(&self, user_id: &str) -> Result<Vec<String>, StoreError>;

    /// The subset of `requested` the user is a member of, in request order.
    async fn authorized_channels(
        &self,
        user_id: &str,
        requested: &[String],
    ) -> Result<Vec<String>, StoreError> {
        let mut authorized = Vec::with_capacity(requested.len());
        for channel in requested {
            if self.is_subscribed(user_id, channel).await? {
                authorized.push(channel.clone());
            }
        }
        Ok(authorized)
    }
}
