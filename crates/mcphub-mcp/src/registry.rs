//! Ordered registry of per-server state snapshots.
//!
//! The outer index is locked only to add, remove or list entries. Each entry
//! is its own copy-on-write cell, so polling readers never wait on a
//! supervisor that is in the middle of a handshake.

use indexmap::IndexMap;
use mcphub_core::ServerState;
use parking_lot::RwLock;
use std::sync::Arc;

struct StateCell {
    state: RwLock<Arc<ServerState>>,
}

/// Registry of every configured server, in configuration order.
#[derive(Default)]
pub struct ServerRegistry {
    entries: RwLock<IndexMap<String, Arc<StateCell>>>,
}

impl ServerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace in place) the entry for `initial.name` and hand out
    /// the only handle allowed to publish into it.
    pub fn register(&self, initial: ServerState) -> StateWriter {
        let name = initial.name.clone();
        let cell = Arc::new(StateCell {
            state: RwLock::new(Arc::new(initial)),
        });
        self.entries.write().insert(name.clone(), cell.clone());
        StateWriter { name, cell }
    }

    /// Remove an entry, keeping the order of the others.
    pub fn remove(&self, name: &str) -> bool {
        self.entries.write().shift_remove(name).is_some()
    }

    /// Latest snapshot for one server.
    pub fn get(&self, name: &str) -> Option<Arc<ServerState>> {
        let cell = self.entries.read().get(name).cloned()?;
        let state = cell.state.read().clone();
        Some(state)
    }

    /// Latest snapshot of every server, in order.
    pub fn snapshot(&self) -> Vec<Arc<ServerState>> {
        let cells: Vec<Arc<StateCell>> = self.entries.read().values().cloned().collect();
        cells.iter().map(|cell| cell.state.read().clone()).collect()
    }

    /// Names in order.
    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    /// Number of registered servers.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no server is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Publishing handle for one registry entry, owned by its supervisor.
///
/// Not `Clone`: each entry has exactly one writer.
pub struct StateWriter {
    name: String,
    cell: Arc<StateCell>,
}

impl StateWriter {
    /// Server this writer publishes for.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The snapshot readers currently see.
    pub fn current(&self) -> Arc<ServerState> {
        self.cell.state.read().clone()
    }

    /// Replace the published snapshot.
    pub fn publish(&self, state: ServerState) {
        *self.cell.state.write() = Arc::new(state);
    }

    /// Derive the next snapshot from the current one and publish it.
    pub fn update(&self, f: impl FnOnce(&ServerState) -> ServerState) -> Arc<ServerState> {
        let next = Arc::new(f(&self.current()));
        *self.cell.state.write() = next.clone();
        next
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use mcphub_core::{ServerStatus, TransportKind};

    fn state(name: &str) -> ServerState {
        ServerState::new(name, TransportKind::Stdio, ServerStatus::Idle)
    }

    #[test]
    fn test_order_is_preserved_across_removal() {
        let registry = ServerRegistry::new();
        let _a = registry.register(state("a"));
        let _b = registry.register(state("b"));
        let _c = registry.register(state("c"));
        assert!(registry.remove("b"));
        assert!(!registry.remove("b"));
        assert_eq!(registry.names(), vec!["a", "c"]);
    }

    #[test]
    fn test_reregister_keeps_position_and_single_entry() {
        let registry = ServerRegistry::new();
        let _a = registry.register(state("a"));
        let _b = registry.register(state("b"));
        let _a2 = registry.register(state("a").transition(ServerStatus::Disabled));
        assert_eq!(registry.names(), vec!["a", "b"]);
        assert_eq!(registry.get("a").unwrap().status, ServerStatus::Disabled);
    }

    #[test]
    fn test_readers_keep_old_snapshot() {
        let registry = ServerRegistry::new();
        let writer = registry.register(state("a"));
        let before = registry.get("a").unwrap();

        writer.update(|s| s.transition(ServerStatus::Connecting));
        assert_eq!(before.status, ServerStatus::Idle);
        assert_eq!(registry.get("a").unwrap().status, ServerStatus::Connecting);
        assert_eq!(writer.current().status, ServerStatus::Connecting);
    }

    #[test]
    fn test_removed_entry_ignores_stale_writer() {
        let registry = ServerRegistry::new();
        let writer = registry.register(state("a"));
        registry.remove("a");
        writer.publish(state("a").transition(ServerStatus::Connected));
        assert!(registry.get("a").is_none());
        assert!(registry.is_empty());
    }
}
