//! Per-identity writer locks

use crate::core::record::EntityId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One async mutex per (entity kind, identity).
///
/// Writers hold the identity's mutex across the whole read-plan-append
/// sequence; readers never touch it.
#[derive(Debug, Default)]
pub struct LockTable {
    locks: DashMap<(String, EntityId), Arc<Mutex<()>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mutex guarding `id` of `kind`, created on first use
    pub fn lock_for(&self, kind: &str, id: &EntityId) -> Arc<Mutex<()>> {
        self.locks
            .entry((kind.to_string(), id.clone()))
            .or_default()
            .clone()
    }

    /// Forget the mutex of `id` unless someone still holds or waits on it
    pub fn release(&self, kind: &str, id: &EntityId) {
        self.locks
            .remove_if(&(kind.to_string(), id.clone()), |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Drop mutexes nobody is holding or waiting on
    pub fn prune(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
