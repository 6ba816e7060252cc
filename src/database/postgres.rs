use async_trait::async_trait;
use deadpool_postgres::{Object, Pool};
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;

use super::pool::{PoolConfig, PoolStatus};
use super::{EventLog, SubscriptionStore};
use crate::errors::StoreError;
use crate::models::{Event, EventId, NewEvent};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS events (
    id BIGSERIAL PRIMARY KEY,
    channel TEXT NOT NULL,
    event_type TEXT NOT NULL,
    payload JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS idx_events_channel_id ON events (channel, id);
CREATE TABLE IF NOT EXISTS user_subscriptions (
    user_id TEXT NOT NULL,
    channel TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (user_id, channel)
);
";

const EVENT_COLUMNS: &str = "id, channel, event_type, payload, created_at";

/// PostgreSQL-backed event log and subscription store.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &PoolConfig) -> Result<Self, StoreError> {
        Ok(Self::new(config.create_pool()?))
    }

    /// Create the tables if they are missing.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        let client = self.client().await?;
        client.batch_execute(SCHEMA).await?;
        tracing::info!("Database schema is up to date");
        Ok(())
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus::of(&self.pool)
    }

    pub fn close(&self) {
        self.pool.close();
    }

    async fn client(&self) -> Result<Object, StoreError> {
        Ok(self.pool.get().await?)
    }
}

fn row_to_event(row: &Row) -> Result<Event, StoreError> {
    Ok(Event {
        id: row.try_get("id")?,
        channel: row.try_get("channel")?,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl EventLog for PgStore {
    async fn append(&self, event: NewEvent) -> Result<Event, StoreError> {
        let client = self.client().await?;
        let sql = format!(
            "INSERT INTO events (channel, event_type, payload) VALUES ($1, $2, $3) RETURNING {}",
            EVENT_COLUMNS
        );
        let params: [&(dyn ToSql + Sync); 3] = [&event.channel, &event.event_type, &event.payload];
        let row = client.query_one(&sql, &params).await?;
        row_to_event(&row)
    }

    async fn events_after(
        &self,
        channels: &[String],
        after: EventId,
    ) -> Result<Vec<Event>, StoreError> {
        if channels.is_empty() {
            return Ok(Vec::new());
        }
        let client = self.client().await?;
        let sql = format!(
            "SELECT {} FROM events WHERE id > $1 AND channel = ANY($2) ORDER BY id ASC",
            EVENT_COLUMNS
        );
        let channels = channels.to_vec();
        let rows = client.query(&sql, &[&after, &channels]).await?;
        rows.iter().map(row_to_event).collect()
    }

    async fn history(
        &self,
        channel: &str,
        after: Option<EventId>,
        limit: usize,
    ) -> Result<Vec<Event>, StoreError> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT {} FROM events WHERE channel = $1 AND id > $2 ORDER BY id ASC LIMIT $3",
            EVENT_COLUMNS
        );
        let after = after.unwrap_or(0);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = client.query(&sql, &[&channel, &after, &limit]).await?;
        rows.iter().map(row_to_event).collect()
    }
}

#[async_trait]
impl SubscriptionStore for PgStore {
    async fn add(&self, user_id: &str, channel: &str) -> Result<bool, StoreError> {
        let client = self.client().await?;
        let inserted = client
            .execute(
                "INSERT INTO user_subscriptions (user_id, channel) VALUES ($1, $2) \
                 ON CONFLICT (user_id, channel) DO NOTHING",
                &[&user_id, &channel],
            )
            .await?;
        Ok(inserted > 0)
    }

    async fn remove(&self, user_id: &str, channel: &str) -> Result<bool, StoreError> {
        let client = self.client().await?;
        let deleted = client
            .execute(
                "DELETE FROM user_subscriptions WHERE user_id = $1 AND channel = $2",
                &[&user_id, &channel],
            )
            .await?;
        Ok(deleted > 0)
    }

    async fn is_subscribed(&self, user_id: &str, channel: &str) -> Result<bool, StoreError> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT 1 FROM user_subscriptions WHERE user_id = $1 AND channel = $2",
                &[&user_id, &channel],
            )
            .await?;
        Ok(row.is_some())
    }

    async fn list_channels(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT channel FROM user_subscriptions WHERE user_id = $1 ORDER BY channel",
                &[&user_id],
            )
            .await?;
        rows.iter()
            .map(|row| row.try_get("channel").map_err(StoreError::from))
            .collect()
    }

    async fn authorized_channels(
        &self,
        user_id: &str,
        requested: &[String],
    ) -> Result<Vec<String>, StoreError> {
        if requested.is_empty() {
            return Ok(Vec::new());
        }
        let client = self.client().await?;
        let wanted = requested.to_vec();
        let rows = client
            .query(
                "SELECT channel FROM user_subscriptions WHERE user_id = $1 AND channel = ANY($2)",
                &[&user_id, &wanted],
            )
            .await?;
        let granted = rows
            .iter()
            .map(|row| row.try_get::<_, String>("channel"))
            .collect::<Result<ahash::AHashSet<_>, _>>()?;
        Ok(requested
            .iter()
            .filter(|channel| granted.contains(channel.as_str()))
            .cloned()
            .collect())
    }
}
