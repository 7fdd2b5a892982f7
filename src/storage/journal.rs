//! Record journal: append-only storage for version records

use crate::core::record::EntityId;
use crate::error::{Error, Result};
use crate::storage::entry::JournalEntry;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};

/// Selects entries for [`RecordJournal::scan_all`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanFilter {
    /// Only entries of this entity kind
    pub kind: Option<String>,
    /// Only entries whose processing interval is still open
    pub open_only: bool,
}

impl ScanFilter {
    pub fn kind(kind: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            open_only: false,
        }
    }

    pub fn open_only(mut self) -> Self {
        self.open_only = true;
        self
    }

    fn matches(&self, entry: &JournalEntry) -> bool {
        self.kind.as_deref().map_or(true, |k| k == entry.kind())
            && (!self.open_only || entry.is_open())
    }
}

/// Trait for record journal implementations.
///
/// Scans return the latest revision of each entry, in the order entries were
/// first appended.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordJournal: Send + Sync {
    /// Append one entry
    async fn append(&mut self, entry: JournalEntry) -> Result<()>;

    /// Append multiple entries atomically: either all are stored or none
    async fn append_batch(&mut self, entries: Vec<JournalEntry>) -> Result<()>;

    /// All entries of one entity, ordered by sequence
    async fn scan(&self, kind: &str, entity_id: &EntityId) -> Result<Vec<JournalEntry>>;

    /// All entries passing `filter`
    async fn scan_all(&self, filter: &ScanFilter) -> Result<Vec<JournalEntry>>;

    /// Flush pending writes to disk
    async fn flush(&mut self) -> Result<()>;
}

type EntityKey = (String, EntityId);

/// What appending an entry would do
enum Placement {
    /// New address, goes at the end
    Push,
    /// Replaces the entry at this position
    Revise(usize),
    /// Same entry already stored
    Duplicate,
}

/// In-memory implementation of the record journal
#[derive(Debug, Clone, Default)]
pub struct InMemoryJournal {
    /// Latest revision of every entry, in first-append order
    entries: Vec<JournalEntry>,
    /// Map from (kind, entity) to seq -> position in `entries`
    by_entity: HashMap<EntityKey, BTreeMap<u64, usize>>,
}

impl InMemoryJournal {
    /// Create a new in-memory journal
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn locate(&self, entry: &JournalEntry) -> Option<usize> {
        self.by_entity
            .get(&(entry.kind().to_string(), entry.entity_id().clone()))
            .and_then(|seqs| seqs.get(&entry.seq()))
            .copied()
    }

    fn place(&self, entry: &JournalEntry, previous: Option<&JournalEntry>) -> Result<Placement> {
        let stored = || self.locate(entry).map(|i| &self.entries[i]);
        let Some(previous) = previous.or_else(stored) else {
            return Ok(Placement::Push);
        };
        if previous.id() == entry.id() {
            return if previous == entry {
                Ok(Placement::Duplicate)
            } else {
                Err(Error::Storage(format!(
                    "entry {} rewritten with different content",
                    entry.id()
                )))
            };
        }
        check_revision(previous, entry)?;
        Ok(self
            .locate(entry)
            .map_or(Placement::Push, Placement::Revise))
    }

    /// Check that every entry of `entries` could be appended in order
    pub fn validate_batch(&self, entries: &[JournalEntry]) -> Result<()> {
        let mut pending: HashMap<(EntityKey, u64), &JournalEntry> = HashMap::new();
        for entry in entries {
            let key = ((entry.kind().to_string(), entry.entity_id().clone()), entry.seq());
            self.place(entry, pending.get(&key).copied())?;
            pending.insert(key, entry);
        }
        Ok(())
    }

    /// Store one entry, folding it over an earlier revision at the same address
    pub fn insert(&mut self, entry: JournalEntry) -> Result<()> {
        match self.place(&entry, None)? {
            Placement::Duplicate => {}
            Placement::Revise(pos) => self.entries[pos] = entry,
            Placement::Push => {
                let key = (entry.kind().to_string(), entry.entity_id().clone());
                self.by_entity
                    .entry(key)
                    .or_default()
                    .insert(entry.seq(), self.entries.len());
                self.entries.push(entry);
            }
        }
        Ok(())
    }

    /// Fold an entry read back from disk. Besides exact duplicates, an open
    /// entry whose closed revision is already stored is skipped.
    pub fn recover(&mut self, entry: JournalEntry) -> Result<()> {
        let superseded = self.locate(&entry).is_some_and(|i| {
            let stored = &self.entries[i];
            entry.is_open() && check_revision(&entry, stored).is_ok()
        });
        if superseded {
            return Ok(());
        }
        self.insert(entry)
    }
}

/// The only legal revision keeps everything but closes the processing
/// interval at a concrete instant
fn check_revision(previous: &JournalEntry, next: &JournalEntry) -> Result<()> {
    let legal = previous.is_open()
        && !next.is_open()
        && previous.processing().from() == next.processing().from()
        && previous.metadata.business == next.metadata.business
        && previous.payload == next.payload;
    if legal {
        Ok(())
    } else {
        Err(Error::Storage(format!(
            "illegal revision of {}/{} #{}: processing {} -> {}",
            next.kind(),
            next.entity_id(),
            next.seq(),
            previous.processing(),
            next.processing()
        )))
    }
}

#[async_trait]
impl RecordJournal for InMemoryJournal {
    async fn append(&mut self, entry: JournalEntry) -> Result<()> {
        self.insert(entry)
    }

    async fn append_batch(&mut self, entries: Vec<JournalEntry>) -> Result<()> {
        self.validate_batch(&entries)?;
        for entry in entries {
            self.insert(entry)?;
        }
        Ok(())
    }

    async fn scan(&self, kind: &str, entity_id: &EntityId) -> Result<Vec<JournalEntry>> {
        Ok(self
            .by_entity
            .get(&(kind.to_string(), entity_id.clone()))
            .map(|seqs| seqs.values().map(|&i| self.entries[i].clone()).collect())
            .unwrap_or_default())
    }

    async fn scan_all(&self, filter: &ScanFilter) -> Result<Vec<JournalEntry>> {
        Ok(self
            .entries
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect())
    }

    async fn flush(&mut self) -> Result<()> {
        // In-memory journal doesn't need flushing
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::VersionRecord;
    use crate::core::temporal::{Interval, Timestamp};
    use serde_json::json;

    fn entry(kind: &str, id: i64, seq: u64, recorded: i64) -> JournalEntry {
        let record = VersionRecord::new(
            EntityId::Numeric(id),
            seq,
            json!({"seq": seq}),
            Some(Interval::open(Timestamp::from_secs(0))),
            Interval::open(Timestamp::from_secs(recorded)),
        );
        JournalEntry::from_record(kind, &record, record.processing().from()).unwrap()
    }

    fn closed(entry: &JournalEntry, at: i64) -> JournalEntry {
        let mut revised = entry.clone();
        revised.metadata.id = crate::storage::entry::EntryId::new();
        revised.metadata.processing = entry.processing().closed_at(Timestamp::from_secs(at)).unwrap();
        revised
    }

    #[tokio::test]
    async fn test_append_and_scan() {
        let mut journal = InMemoryJournal::new();
        journal.append(entry("salary", 1, 1, 10)).await.unwrap();
        journal.append(entry("salary", 1, 0, 10)).await.unwrap();
        journal.append(entry("salary", 2, 0, 11)).await.unwrap();
        journal.append(entry("account", 1, 0, 12)).await.unwrap();

        let salary = journal.scan("salary", &EntityId::Numeric(1)).await.unwrap();
        let seqs: Vec<_> = salary.iter().map(|e| e.seq()).collect();
        assert_eq!(seqs, vec![0, 1]);

        let all = journal.scan_all(&ScanFilter::kind("salary")).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].seq(), 1);
        assert!(journal
            .scan("salary", &EntityId::Numeric(9))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_revision_folds_last_wins() {
        let mut journal = InMemoryJournal::new();
        let first = entry("salary", 1, 0, 10);
        journal.append(first.clone()).await.unwrap();
        journal.append(entry("salary", 1, 1, 20)).await.unwrap();
        journal.append(closed(&first, 20)).await.unwrap();

        assert_eq!(journal.len(), 2);
        let open = journal
            .scan_all(&ScanFilter::kind("salary").open_only())
            .await
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].seq(), 1);

        // A stale copy of a revised entry is rejected, the stored copy is a no-op
        journal.append(first.clone()).await.unwrap_err();
        let again = journal.scan("salary", &EntityId::Numeric(1)).await.unwrap();
        journal.append(again[0].clone()).await.unwrap();
        assert_eq!(journal.len(), 2);
    }

    #[tokio::test]
    async fn test_illegal_revisions() {
        let mut journal = InMemoryJournal::new();
        let first = entry("salary", 1, 0, 10);
        journal.append(first.clone()).await.unwrap();

        // Reopening or reclosing a closed entry
        let shut = closed(&first, 20);
        journal.append(shut.clone()).await.unwrap();
        assert!(journal.append(closed(&first, 30)).await.is_err());

        // Changing the payload of an open entry
        let mut other = entry("salary", 2, 0, 10);
        journal.append(other.clone()).await.unwrap();
        other.metadata.id = crate::storage::entry::EntryId::new();
        other.payload.data = b"{}".to_vec();
        assert!(matches!(journal.append(other).await, Err(Error::Storage(_))));
    }

    #[tokio::test]
    async fn test_batch_is_all_or_nothing() {
        let mut journal = InMemoryJournal::new();
        let first = entry("salary", 1, 0, 10);
        journal.append(first.clone()).await.unwrap();

        let good = entry("salary", 1, 1, 20);
        let bad = closed(&first, 30);
        let result = journal
            .append_batch(vec![closed(&first, 20), good, bad])
            .await;
        assert!(result.is_err());
        assert_eq!(journal.len(), 1);
        assert!(journal.scan("salary", &EntityId::Numeric(1)).await.unwrap()[0].is_open());

        // A batch may revise an entry it added itself
        let fresh = entry("salary", 3, 0, 10);
        journal
            .append_batch(vec![fresh.clone(), closed(&fresh, 15)])
            .await
            .unwrap();
        let stored = journal.scan("salary", &EntityId::Numeric(3)).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert!(!stored[0].is_open());
    }
}
