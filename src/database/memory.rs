use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use super::{EventLog, SubscriptionStore};
use crate::errors::StoreError;
use crate::models::{Event, EventId, NewEvent};

/// In-process event log and subscription store.
///
/// Ids are assigned under the write lock, so the log stays sorted by id.
#[derive(Default)]
pub struct MemoryStore {
    events: RwLock<Vec<Event>>,
    subscriptions: RwLock<BTreeSet<(String, String)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_event_id(&self) -> Option<EventId> {
        self.events.read().last().map(|event| event.id)
    }
}

#[async_trait]
impl EventLog for MemoryStore {
    async fn append(&self, event: NewEvent) -> Result<Event, StoreError> {
        let mut events = self.events.write();
        let id = events.last().map(|e| e.id + 1).unwrap_or(1);
        let stored = event.into_event(id, Utc::now());
        events.push(stored.clone());
        Ok(stored)
    }

    async fn events_after(
        &self,
        channels: &[String],
        after: EventId,
    ) -> Result<Vec<Event>, StoreError> {
        let events = self.events.read();
        let start = events.partition_point(|e| e.id <= after);
        Ok(events[start..]
            .iter()
            .filter(|e| channels.contains(&e.channel))
            .cloned()
            .collect())
    }

    async fn history(
        &self,
        channel: &str,
        after: Option<EventId>,
        limit: usize,
    ) -> Result<Vec<Event>, StoreError> {
        let events = self.events.read();
        let start = events.partition_point(|e| e.id <= after.unwrap_or(0));
        Ok(events[start..]
            .iter()
            .filter(|e| e.channel == channel)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn add(&self, user_id: &str, channel: &str) -> Result<bool, StoreError> {
        Ok(self
            .subscriptions
            .write()
            .insert((user_id.to_string(), channel.to_string())))
    }

    async fn remove(&self, user_id: &str, channel: &str) -> Result<bool, StoreError> {
        Ok(self
            .subscriptions
            .write()
            .remove(&(user_id.to_string(), channel.to_string())))
    }

    async fn is_subscribed(&self, user_id: &str, channel: &str) -> Result<bool, StoreError> {
        Ok(self
            .subscriptions
            .read()
            .contains(&(user_id.to_string(), channel.to_string())))
    }

    async fn list_channels(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .subscriptions
            .read()
            .iter()
            .filter(|(user, _)| user == user_id)
            .map(|(_, channel)| channel.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_append_assigns_increasing_ids() {
        let store = MemoryStore::new();
        let first = store.append(NewEvent::new("a", "t", json!(1))).await.unwrap();
        let second = store.append(NewEvent::new("b", "t", json!(2))).await.unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(store.last_event_id(), Some(2));
    }

    #[tokio::test]
    async fn test_events_after_filters_channels_in_id_order() {
        let store = MemoryStore::new();
        for channel in ["a", "b", "a", "c", "b"] {
            store
                .append(NewEvent::new(channel, "t", json!({ "channel": channel })))
                .await
                .unwrap();
        }
        let ids: Vec<_> = store
            .events_after(&["a".to_string(), "b".to_string()], 1)
            .await
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![2, 3, 5]);
    }

    #[tokio::test]
    async fn test_history_pages() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.append(NewEvent::new("a", "t", json!(i))).await.unwrap();
        }
        let page = store.history("a", Some(2), 2).await.unwrap();
        assert_eq!(page.iter().map(|e| e.id).collect::<Vec<_>>(), vec![3, 4]);
        assert!(store.history("missing", None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_subscription_membership() {
        let store = MemoryStore::new();
        assert!(store.add("alice", "news").await.unwrap());
        assert!(!store.add("alice", "news").await.unwrap());
        store.add("alice", "sports").await.unwrap();
        store.add("bob", "news").await.unwrap();

        assert_eq!(
            store.list_channels("alice").await.unwrap(),
            vec!["news".to_string(), "sports".to_string()]
        );
        let requested = vec!["weather".to_string(), "news".to_string()];
        assert_eq!(
            store.authorized_channels("alice", &requested).await.unwrap(),
            vec!["news".to_string()]
        );

        assert!(store.remove("alice", "news").await.unwrap());
        assert!(!store.is_subscribed("alice", "news").await.unwrap());
    }
}
