use std::sync::Arc;

use ahash::AHashMap;
use dashmap::DashMap;
use tracing::warn;

use super::connection::{Connection, ConnectionId};
use crate::errors::{Error, SinkError};

/// Channel name -> attached connections.
///
/// The registry is the only owner of channel membership. Mutations of one
/// channel are serialized by its map shard; readers take snapshots so a
/// broadcast never holds a shard lock while writing to sinks.
#[derive(Default)]
pub struct ConnectionRegistry {
    channels: DashMap<String, AHashMap<ConnectionId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Attach a connection to a channel. Returns `false` if it was already attached.
    pub fn attach(&self, channel: &str, connection: &Arc<Connection>) -> bool {
        let mut entry = self.channels.entry(channel.to_string()).or_default();
        if entry.contains_key(&connection.id()) {
            return false;
        }
        entry.insert(connection.id(), connection.clone());
        true
    }

    /// Detach a connection from a channel, dropping the channel entry once empty.
    pub fn detach(&self, channel: &str, connection_id: ConnectionId) -> bool {
        let removed = match self.channels.get_mut(channel) {
            Some(mut entry) => entry.remove(&connection_id).is_some(),
            None => false,
        };
        self.channels.remove_if(channel, |_, set| set.is_empty());
        removed
    }

    /// Detach a connection from every channel it declared.
    pub fn detach_all(&self, connection: &Connection) -> usize {
        connection
            .channels()
            .iter()
            .filter(|channel| self.detach(channel, connection.id()))
            .count()
    }

    /// Close a connection and detach it everywhere. Returns `true` if this
    /// call did the closing.
    pub fn evict(&self, connection: &Connection) -> bool {
        let closed = connection.close();
        self.detach_all(connection);
        closed
    }

    /// Evict a connection whose sink rejected a write. Failures stay local to
    /// that connection.
    pub(crate) fn evict_failed(
        &self,
        connection: &Connection,
        source: SinkError,
        path: &'static str,
    ) {
        let err = Error::TransientIo {
            connection: connection.id(),
            source,
        };
        if self.evict(connection) {
            warn!(
                connection_id = %connection.id(),
                user_id = %connection.user_id(),
                path,
                error = %err,
                "Sink write failed, dropping connection"
            );
        }
    }

    /// Copy of the connections attached to a channel.
    pub fn snapshot(&self, channel: &str) -> Vec<Arc<Connection>> {
        self.channels
            .get(channel)
            .map(|entry| entry.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Every distinct attached connection, regardless of how many channels it is on.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        let mut unique: AHashMap<ConnectionId, Arc<Connection>> = AHashMap::new();
        for entry in self.channels.iter() {
            for (id, connection) in entry.value().iter() {
                unique.entry(*id).or_insert_with(|| connection.clone());
            }
        }
        unique.into_values().collect()
    }

    /// Total number of (channel, connection) attachments.
    pub fn count(&self) -> usize {
        self.channels.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|entry| entry.len())
            .unwrap_or(0)
    }

    /// Empty the registry, returning every connection that was attached.
    pub fn drain(&self) -> Vec<Arc<Connection>> {
        let connections = self.connections();
        self.channels.clear();
        connections
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(channels: &[&str]) -> Arc<Connection> {
        let (conn, rx) = Connection::new(
            "user",
            channels.iter().map(|c| c.to_string()).collect(),
            8,
            None,
        );
        // Receivers are not needed for membership tests.
        drop(rx);
        conn
    }

    #[test]
    fn test_attach_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let conn = connection(&["news"]);
        assert!(registry.attach("news", &conn));
        assert!(!registry.attach("news", &conn));
        assert_eq!(registry.subscriber_count("news"), 1);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_attach_then_detach_prunes_channel() {
        let registry = ConnectionRegistry::new();
        let conn = connection(&["news"]);
        registry.attach("news", &conn);
        assert!(registry.detach("news", conn.id()));
        assert_eq!(registry.channel_count(), 0);
        assert_eq!(registry.subscriber_count("news"), 0);
        assert!(!registry.detach("news", conn.id()));
    }

    #[test]
    fn test_count_across_channels() {
        let registry = ConnectionRegistry::new();
        let a: Vec<_> = (0..3).map(|_| connection(&["a"])).collect();
        let b: Vec<_> = (0..2).map(|_| connection(&["b"])).collect();
        for conn in &a {
            registry.attach("a", conn);
        }
        for conn in &b {
            registry.attach("b", conn);
        }
        assert_eq!(registry.count(), 5);

        registry.detach("a", a[0].id());
        assert_eq!(registry.count(), 4);
        assert_eq!(registry.channel_count(), 2);
    }

    #[test]
    fn test_connections_are_deduplicated() {
        let registry = ConnectionRegistry::new();
        let conn = connection(&["a", "b"]);
        registry.attach("a", &conn);
        registry.attach("b", &conn);
        assert_eq!(registry.count(), 2);
        assert_eq!(registry.connections().len(), 1);
    }

    #[test]
    fn test_evict_closes_and_detaches_everywhere() {
        let registry = ConnectionRegistry::new();
        let conn = connection(&["a", "b"]);
        registry.attach("a", &conn);
        registry.attach("b", &conn);

        assert!(registry.evict(&conn));
        assert!(!conn.is_alive());
        assert_eq!(registry.count(), 0);
        assert_eq!(registry.channel_count(), 0);
        assert!(!registry.evict(&conn));
    }

    #[test]
    fn test_snapshot_is_independent_of_later_mutation() {
        let registry = ConnectionRegistry::new();
        let first = connection(&["news"]);
        let second = connection(&["news"]);
        registry.attach("news", &first);
        registry.attach("news", &second);

        let snapshot = registry.snapshot("news");
        registry.detach("news", first.id());
        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.snapshot("news").len(), 1);
    }

    #[test]
    fn test_concurrent_churn_leaves_no_entries() {
        let registry = Arc::new(ConnectionRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let channel = format!("chan-{}", i % 3);
                    for _ in 0..200 {
                        let conn = connection(&[channel.as_str()]);
                        registry.attach(&channel, &conn);
                        let _ = registry.snapshot(&channel);
                        registry.detach(&channel, conn.id());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.count(), 0);
        assert_eq!(registry.channel_count(), 0);
    }
}
