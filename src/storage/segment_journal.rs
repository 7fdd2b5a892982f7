//! Persistent record journal backed by WAL + segment files.
//!
//! A batch is committed once its WAL frame is written; it is folded into the
//! in-memory view at the same moment and queued for the segments. `flush`
//! writes the queue to a segment, seals it and only then clears the WAL, so
//! a crash at any point leaves each batch either in a sealed segment or in
//! the WAL. A failed flush keeps the queue and the WAL for the next attempt.

use crate::core::record::EntityId;
use crate::error::Result;
use crate::storage::entry::JournalEntry;
use crate::storage::journal::{InMemoryJournal, RecordJournal, ScanFilter};
use crate::storage::segment_file::{
    SegmentHeader, SegmentReader, SegmentWriter, MAX_ENTRIES_PER_SEGMENT, MAX_SEGMENT_SIZE,
};
use crate::storage::wal::WriteAheadLog;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Manages creation and rotation of segment files on disk.
pub struct SegmentManager {
    /// Directory where segment files are stored.
    dir: PathBuf,
    /// Currently open segment writer, if any.
    active: Option<SegmentWriter>,
    /// Next segment ID to allocate.
    next_segment_id: u64,
    /// Sealed segment headers in ID order.
    segments: Vec<SegmentHeader>,
}

impl SegmentManager {
    /// Open the manager rooted at `dir`, cataloguing the segments already
    /// there. Segments that were never sealed are removed; their entries
    /// are still in the WAL.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut segments = Vec::new();
        let mut next_segment_id = 1;
        for dir_entry in fs::read_dir(&dir)? {
            let path = dir_entry?.path();
            let Some(segment_id) = parse_segment_id(&path) else {
                continue;
            };
            next_segment_id = next_segment_id.max(segment_id + 1);

            let header = SegmentReader::open(&path).map(|r| r.header().clone());
            match header {
                Ok(header) if header.is_sealed() => segments.push(header),
                Ok(_) | Err(_) => {
                    warn!(path = %path.display(), "Removing unsealed segment");
                    fs::remove_file(&path)?;
                }
            }
        }
        segments.sort_by_key(|h| h.segment_id);

        Ok(Self {
            dir,
            active: None,
            next_segment_id,
            segments,
        })
    }

    fn segment_path(&self, segment_id: u64) -> PathBuf {
        self.dir.join(format!("segment-{segment_id:020}.seg"))
    }

    fn open_new_segment(&mut self) -> Result<()> {
        let segment_id = self.next_segment_id;
        self.next_segment_id += 1;

        let path = self.segment_path(segment_id);
        debug!(segment_id, path = %path.display(), "Opening segment");
        self.active = Some(SegmentWriter::create(path, segment_id)?);
        Ok(())
    }

    fn rotate_if_needed(&mut self) -> Result<()> {
        let full = self.active.as_ref().is_some_and(|writer| {
            let header = writer.header();
            header.entry_count >= MAX_ENTRIES_PER_SEGMENT
                || header.compressed_size as u64 >= MAX_SEGMENT_SIZE
        });
        if full {
            self.seal_active()?;
        }
        Ok(())
    }

    fn seal_active(&mut self) -> Result<()> {
        if let Some(writer) = self.active.take() {
            let header = writer.finalize()?;
            debug!(
                segment_id = header.segment_id,
                entries = header.entry_count,
                "Sealed segment"
            );
            self.segments.push(header);
        }
        Ok(())
    }

    /// Append an entry to the active segment, opening one if needed
    pub fn append_entry(&mut self, entry: JournalEntry) -> Result<()> {
        if self.active.is_none() {
            self.open_new_segment()?;
        }
        if let Some(writer) = self.active.as_mut() {
            writer.append(entry)?;
        }
        self.rotate_if_needed()
    }

    /// Flush all active data to disk and close the current segment.
    pub fn flush(&mut self) -> Result<()> {
        self.seal_active()
    }

    /// Drop a half-written active segment; `open` removes its file
    pub fn discard_active(&mut self) {
        if let Some(writer) = self.active.take() {
            warn!(segment_id = writer.header().segment_id, "Discarding unsealed segment");
        }
    }

    /// List all sealed segment headers.
    pub fn segments(&self) -> &[SegmentHeader] {
        &self.segments
    }

    /// Read all entries from all sealed segments (used for recovery).
    pub fn read_all_entries(&self) -> Result<Vec<JournalEntry>> {
        let mut all = Vec::new();
        for header in &self.segments {
            let mut reader = SegmentReader::open(self.segment_path(header.segment_id))?;
            all.extend(reader.read_entries()?);
        }
        Ok(all)
    }
}

fn parse_segment_id(path: &Path) -> Option<u64> {
    path.file_name()?
        .to_str()?
        .strip_prefix("segment-")?
        .strip_suffix(".seg")?
        .parse()
        .ok()
}

/// Disk-backed implementation of `RecordJournal` using a WAL and segment files.
pub struct SegmentedJournal<W: WriteAheadLog> {
    wal: W,
    segment_manager: SegmentManager,
    /// In-memory view used for queries.
    in_memory: InMemoryJournal,
    /// Committed entries not yet in a sealed segment
    pending: Vec<JournalEntry>,
}

impl<W: WriteAheadLog> SegmentedJournal<W> {
    /// Open the journal rooted at `dir`, replaying sealed segments and then
    /// the WAL. Entries recovered from the WAL stay queued so the next flush
    /// persists them.
    pub fn open<P: AsRef<Path>>(dir: P, wal: W) -> Result<Self> {
        let segment_manager = SegmentManager::open(dir)?;
        let mut in_memory = InMemoryJournal::new();

        let from_segments = segment_manager.read_all_entries()?;
        let segment_count = from_segments.len();
        for entry in from_segments {
            in_memory.recover(entry)?;
        }

        let mut journal = Self {
            wal,
            segment_manager,
            in_memory,
            pending: Vec::new(),
        };

        let batches = journal.wal.replay()?;
        let wal_batches = batches.len();
        for entry in batches.into_iter().flatten() {
            journal.in_memory.recover(entry.clone())?;
            journal.pending.push(entry);
        }

        info!(
            segments = journal.segment_manager.segments().len(),
            segment_entries = segment_count,
            wal_batches,
            "Opened segmented journal"
        );
        Ok(journal)
    }

    /// Get list of all sealed segment headers.
    pub fn segments(&self) -> &[SegmentHeader] {
        self.segment_manager.segments()
    }

    fn write_pending(&mut self) -> Result<()> {
        for entry in &self.pending {
            self.segment_manager.append_entry(entry.clone())?;
        }
        self.segment_manager.flush()?;
        self.pending.clear();
        Ok(())
    }
}

#[async_trait::async_trait]
impl<W> RecordJournal for SegmentedJournal<W>
where
    W: WriteAheadLog + Send + Sync,
{
    async fn append(&mut self, entry: JournalEntry) -> Result<()> {
        self.append_batch(vec![entry]).await
    }

    async fn append_batch(&mut self, entries: Vec<JournalEntry>) -> Result<()> {
        // 1. Reject the batch before anything is written.
        self.in_memory.validate_batch(&entries)?;

        // 2. Commit point: the WAL frame holds the whole batch.
        self.wal.append(&entries)?;

        // 3. Fold into the query view; validated above, so every insert lands.
        for entry in &entries {
            self.in_memory.insert(entry.clone())?;
        }
        self.pending.extend(entries);
        Ok(())
    }

    async fn scan(&self, kind: &str, entity_id: &EntityId) -> Result<Vec<JournalEntry>> {
        self.in_memory.scan(kind, entity_id).await
    }

    async fn scan_all(&self, filter: &ScanFilter) -> Result<Vec<JournalEntry>> {
        self.in_memory.scan_all(filter).await
    }

    async fn flush(&mut self) -> Result<()> {
        self.wal.flush()?;
        if let Err(err) = self.write_pending() {
            self.segment_manager.discard_active();
            return Err(err);
        }
        self.wal.clear()?;
        Ok(())
    }
}
