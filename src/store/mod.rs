//! Store handle shared by every repository

pub mod locks;
pub mod repository;

pub use locks::LockTable;
pub use repository::Repository;

use crate::config::{StorageConfig, StoreConfig};
use crate::core::clock::{Clock, SystemClock};
use crate::core::record::{AttributeSet, EntityKind};
use crate::error::Result;
use crate::identity::{IdentityAllocator, InMemoryIdentityAllocator};
use crate::storage::{FileWAL, InMemoryJournal, InMemoryWAL, RecordJournal, SegmentedJournal};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// WAL file name inside a segmented store's directory
pub const WAL_FILE: &str = "wal.log";

/// Bitemporal store: one journal, one identity allocator and one clock,
/// shared by the repositories of every entity kind.
///
/// Cloning is cheap and every clone talks to the same storage.
#[derive(Clone)]
pub struct BitemporalStore {
    /// Record journal
    journal: Arc<RwLock<dyn RecordJournal>>,
    /// Per-identity writer locks
    locks: Arc<LockTable>,
    allocator: Option<Arc<dyn IdentityAllocator>>,
    clock: Arc<dyn Clock>,
}

impl BitemporalStore {
    /// Create a new in-memory store with default identity allocation
    pub fn in_memory() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> StoreBuilder {
        StoreBuilder::default()
    }

    /// Build the store described by `config`, recovering any durable state
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        let mut builder = Self::builder();

        builder = match &config.storage {
            StorageConfig::Memory => builder.journal(InMemoryJournal::new()),
            StorageConfig::Segmented { dir, wal: true } => {
                let wal = FileWAL::open(dir.join(WAL_FILE))?;
                builder.journal(SegmentedJournal::open(dir, wal)?)
            }
            StorageConfig::Segmented { dir, wal: false } => {
                builder.journal(SegmentedJournal::open(dir, InMemoryWAL::new())?)
            }
        };

        builder = if config.identity.enabled {
            builder.allocator(InMemoryIdentityAllocator::new(
                config.identity.start,
                config.identity.increment,
            )?)
        } else {
            builder.without_allocator()
        };

        info!(storage = ?config.storage, identity = config.identity.enabled, "Store configured");
        Ok(builder.build())
    }

    /// Repository for entities of `kind` carrying attributes `A`
    pub fn repository<A: AttributeSet>(&self, kind: EntityKind) -> Repository<A> {
        Repository::new(self.clone(), kind)
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Flush pending writes
    pub async fn flush(&self) -> Result<()> {
        self.journal.write().await.flush().await?;
        self.locks.prune();
        Ok(())
    }
}

/// Builder for [`BitemporalStore`]
pub struct StoreBuilder {
    journal: Arc<RwLock<dyn RecordJournal>>,
    allocator: Option<Arc<dyn IdentityAllocator>>,
    clock: Arc<dyn Clock>,
}

impl Default for StoreBuilder {
    fn default() -> Self {
        Self {
            journal: Arc::new(RwLock::new(InMemoryJournal::new())),
            allocator: Some(Arc::new(InMemoryIdentityAllocator::default())),
            clock: Arc::new(SystemClock),
        }
    }
}

impl StoreBuilder {
    pub fn journal(mut self, journal: impl RecordJournal + 'static) -> Self {
        self.journal = Arc::new(RwLock::new(journal));
        self
    }

    pub fn allocator(mut self, allocator: impl IdentityAllocator + 'static) -> Self {
        self.allocator = Some(Arc::new(allocator));
        self
    }

    /// Inserts must then always name their identity
    pub fn without_allocator(mut self) -> Self {
        self.allocator = None;
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn build(self) -> BitemporalStore {
        BitemporalStore {
            journal: self.journal,
            locks: Arc::new(LockTable::new()),
            allocator: self.allocator,
            clock: self.clock,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::EntityId;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_segmented_store_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig {
            storage: StorageConfig::Segmented {
                dir: temp_dir.path().to_path_buf(),
                wal: true,
            },
            ..StoreConfig::default()
        };

        let id = {
            let store = BitemporalStore::from_config(&config).unwrap();
            let accounts = store.repository::<Value>(EntityKind::uni_temporal("account"));
            let record = accounts.insert(None, json!({"balance": 10}), None).await.unwrap();
            record.id().clone()
        };

        // Never flushed: recovered from the WAL
        let store = BitemporalStore::from_config(&config).unwrap();
        let accounts = store.repository::<Value>(EntityKind::uni_temporal("account"));
        let found = accounts.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(found.attributes()["balance"], 10);
        store.flush().await.unwrap();
    }

    #[tokio::test]
    async fn test_without_allocator() {
        let config = StoreConfig::from_json(r#"{"identity": {"enabled": false}}"#).unwrap();
        let store = BitemporalStore::from_config(&config).unwrap();
        let accounts = store.repository::<Value>(EntityKind::uni_temporal("account"));

        let err = accounts.insert(None, json!({}), None).await.unwrap_err();
        assert!(matches!(err, crate::error::Error::Configuration(_)));
        accounts
            .insert(Some(EntityId::Numeric(7)), json!({}), None)
            .await
            .unwrap();
    }
}
