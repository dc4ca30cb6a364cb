//! Connection registry: node identity ↔ live agent connection.
//!
//! The only contended in-memory map in the control plane. Lookups are O(1),
//! no lock is held across I/O, and the connected-nodes snapshot is cached
//! for batch fan-out queries.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

/// Snapshot cache TTL.
const SNAPSHOT_TTL: Duration = Duration::from_secs(5);

/// Maps node ids to live agent connection ids, with a reverse index for
/// disconnect handling.
pub struct ConnectionRegistry {
    /// node id → connection id
    forward: DashMap<String, String>,
    /// connection id → node id
    reverse: DashMap<String, String>,
    /// Cached connected-node snapshot; invalidated on any bind/remove.
    snapshot: Mutex<Option<(Instant, Arc<Vec<String>>)>>,
    snapshot_ttl: Duration,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::with_snapshot_ttl(SNAPSHOT_TTL)
    }

    pub fn with_snapshot_ttl(snapshot_ttl: Duration) -> Self {
        Self {
            forward: DashMap::new(),
            reverse: DashMap::new(),
            snapshot: Mutex::new(None),
            snapshot_ttl,
        }
    }

    /// Register the latest connection for a node, atomically replacing any
    /// prior binding. The superseded connection's reverse entry is dropped
    /// so its later disconnect becomes a no-op.
    pub fn bind(&self, node_id: &str, connection_id: &str) {
        let previous = self
            .forward
            .insert(node_id.to_string(), connection_id.to_string());
        if let Some(old_connection) = previous
            && old_connection != connection_id
        {
            self.reverse.remove(&old_connection);
        }
        self.reverse
            .insert(connection_id.to_string(), node_id.to_string());
        self.invalidate_snapshot();
    }

    /// The connection currently bound to a node, if any.
    pub fn get(&self, node_id: &str) -> Option<String> {
        self.forward.get(node_id).map(|entry| entry.value().clone())
    }

    /// The node bound to a connection, if any.
    pub fn node_for_connection(&self, connection_id: &str) -> Option<String> {
        self.reverse
            .get(connection_id)
            .map(|entry| entry.value().clone())
    }

    /// Unbind on disconnect. Returns the node id only when this connection
    /// was still the current one; a superseded connection's disconnect is a
    /// no-op and returns None.
    pub fn remove_by_connection(&self, connection_id: &str) -> Option<String> {
        let (_, node_id) = self.reverse.remove(connection_id)?;

        let removed = self
            .forward
            .remove_if(&node_id, |_, current| current == connection_id)
            .is_some();

        self.invalidate_snapshot();
        removed.then_some(node_id)
    }

    /// Whether a node currently has a live connection.
    pub fn is_connected(&self, node_id: &str) -> bool {
        self.forward.contains_key(node_id)
    }

    /// Connected node ids, cached up to the snapshot TTL.
    pub fn snapshot_connected_nodes(&self) -> Arc<Vec<String>> {
        let mut guard = self.snapshot.lock();
        if let Some((taken_at, nodes)) = guard.as_ref()
            && taken_at.elapsed() < self.snapshot_ttl
        {
            return Arc::clone(nodes);
        }

        let nodes: Arc<Vec<String>> = Arc::new(
            self.forward
                .iter()
                .map(|entry| entry.key().clone())
                .collect(),
        );
        *guard = Some((Instant::now(), Arc::clone(&nodes)));
        nodes
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.reverse.len()
    }

    fn invalidate_snapshot(&self) {
        *self.snapshot.lock() = None;
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
