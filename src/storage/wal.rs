//! Write-Ahead Log for durability
//!
//! Each WAL frame holds one whole batch, so a torn write loses the batch
//! it belongs to and never half of it.

use crate::error::Result;
use crate::storage::entry::JournalEntry;
use crc32fast::Hasher as Crc32Hasher;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Write-Ahead Log trait
pub trait WriteAheadLog: Send + Sync {
    /// Append a batch of entries as one frame
    fn append(&mut self, batch: &[JournalEntry]) -> Result<()>;

    /// Flush WAL to disk
    fn flush(&mut self) -> Result<()>;

    /// Replay batches from WAL, oldest first
    fn replay(&self) -> Result<Vec<Vec<JournalEntry>>>;

    /// Clear WAL (after checkpoint)
    fn clear(&mut self) -> Result<()>;
}

/// In-memory WAL (for testing)
#[derive(Debug, Default)]
pub struct InMemoryWAL {
    batches: Vec<Vec<JournalEntry>>,
}

impl InMemoryWAL {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WriteAheadLog for InMemoryWAL {
    fn append(&mut self, batch: &[JournalEntry]) -> Result<()> {
        self.batches.push(batch.to_vec());
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn replay(&self) -> Result<Vec<Vec<JournalEntry>>> {
        Ok(self.batches.clone())
    }

    fn clear(&mut self) -> Result<()> {
        self.batches.clear();
        Ok(())
    }
}

/// Frame header: payload length then crc32 of the payload, both little endian
const FRAME_HEADER: usize = 8;

/// WAL kept in a single append-only file
pub struct FileWAL {
    file: File,
    path: PathBuf,
}

impl FileWAL {
    /// Open (or create) the log at `path`, cutting off any torn tail so
    /// later frames land right after the last good one
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        let (_, good) = read_frames(&data)?;
        if good < data.len() {
            tracing::warn!(
                path = %path.display(),
                discarded = data.len() - good,
                "Truncating torn WAL tail"
            );
            file.set_len(good as u64)?;
            file.sync_all()?;
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl WriteAheadLog for FileWAL {
    fn append(&mut self, batch: &[JournalEntry]) -> Result<()> {
        let payload = bincode::serialize(batch)?;
        let mut hasher = Crc32Hasher::new();
        hasher.update(&payload);

        let mut frame = Vec::with_capacity(FRAME_HEADER + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&hasher.finalize().to_le_bytes());
        frame.extend_from_slice(&payload);

        // A half-written frame would hide every frame appended after it
        let len = self.file.metadata()?.len();
        if let Err(err) = self.file.write_all(&frame) {
            self.file.set_len(len)?;
            return Err(err.into());
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    fn replay(&self) -> Result<Vec<Vec<JournalEntry>>> {
        let mut data = Vec::new();
        File::open(&self.path)?.read_to_end(&mut data)?;

        let (batches, good) = read_frames(&data)?;
        if good < data.len() {
            tracing::warn!(
                path = %self.path.display(),
                discarded = data.len() - good,
                "Discarding torn WAL tail"
            );
        }
        Ok(batches)
    }

    fn clear(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.sync_all()?;
        Ok(())
    }
}

/// Decode whole frames from the front of `data`, returning the batches and
/// the length of the intact prefix
fn read_frames(data: &[u8]) -> Result<(Vec<Vec<JournalEntry>>, usize)> {
    let mut batches = Vec::new();
    let mut offset = 0;
    while offset + FRAME_HEADER <= data.len() {
        let len = u32::from_le_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]) as usize;
        let checksum = u32::from_le_bytes([
            data[offset + 4],
            data[offset + 5],
            data[offset + 6],
            data[offset + 7],
        ]);
        let start = offset + FRAME_HEADER;
        let Some(payload) = data.get(start..start + len) else {
            break;
        };
        let mut hasher = Crc32Hasher::new();
        hasher.update(payload);
        if hasher.finalize() != checksum {
            break;
        }
        batches.push(bincode::deserialize(payload)?);
        offset = start + len;
    }
    Ok((batches, offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::{EntityId, VersionRecord};
    use crate::core::temporal::{Interval, Timestamp};
    use tempfile::TempDir;

    fn batch(n: i64) -> Vec<JournalEntry> {
        (0..2)
            .map(|seq| {
                let record = VersionRecord::new(
                    EntityId::Numeric(n),
                    seq,
                    serde_json::json!({"n": n}),
                    None,
                    Interval::open(Timestamp::from_secs(n)),
                );
                JournalEntry::from_record("account", &record, record.processing().from()).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_file_wal_replay() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("wal.log");

        let mut wal = FileWAL::open(&path).unwrap();
        wal.append(&batch(1)).unwrap();
        wal.append(&batch(2)).unwrap();
        wal.flush().unwrap();
        drop(wal);

        let wal = FileWAL::open(&path).unwrap();
        let batches = wal.replay().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1][0].entity_id(), &EntityId::Numeric(2));
        assert_eq!(batches[1][1].seq(), 1);
    }

    #[test]
    fn test_torn_tail_is_discarded() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("wal.log");

        let mut wal = FileWAL::open(&path).unwrap();
        wal.append(&batch(1)).unwrap();
        wal.append(&batch(2)).unwrap();
        wal.flush().unwrap();

        let len = std::fs::metadata(&path).unwrap().len();
        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(len - 3)
            .unwrap();

        let batches = wal.replay().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[0][0].entity_id(), &EntityId::Numeric(1));
    }

    #[test]
    fn test_append_after_torn_tail() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("wal.log");

        let mut wal = FileWAL::open(&path).unwrap();
        wal.append(&batch(1)).unwrap();
        wal.flush().unwrap();
        drop(wal);

        // Crash in the middle of the next frame's header
        OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(&[0xff, 0xff, 0x00])
            .unwrap();

        let mut wal = FileWAL::open(&path).unwrap();
        assert_eq!(wal.replay().unwrap().len(), 1);
        wal.append(&batch(2)).unwrap();
        wal.flush().unwrap();
        drop(wal);

        let batches = FileWAL::open(&path).unwrap().replay().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1][0].entity_id(), &EntityId::Numeric(2));
    }

    #[test]
    fn test_clear() {
        let temp_dir = TempDir::new().unwrap();
        let mut wal = FileWAL::open(temp_dir.path().join("wal.log")).unwrap();
        wal.append(&batch(1)).unwrap();
        wal.clear().unwrap();
        assert!(wal.replay().unwrap().is_empty());

        wal.append(&batch(3)).unwrap();
        assert_eq!(wal.replay().unwrap().len(), 1);

        let mut memory = InMemoryWAL::new();
        memory.append(&batch(1)).unwrap();
        assert_eq!(memory.replay().unwrap().len(), 1);
        memory.clear().unwrap();
        assert!(memory.replay().unwrap().is_empty());
    }
}
