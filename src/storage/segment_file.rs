//! Segment file format: low-level on-disk storage

use crate::core::temporal::Timestamp;
use crate::error::{Error, Result};
use crate::storage::entry::JournalEntry;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc32fast::Hasher as Crc32Hasher;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Segment file format version
pub const SEGMENT_VERSION: u8 = 1;

/// Segment header size (64 bytes)
pub const HEADER_SIZE: usize = 64;

/// Magic number: "BTMP1"
pub const MAGIC: &[u8; 5] = b"BTMP1";

/// Maximum entries per segment before rotation
pub const MAX_ENTRIES_PER_SEGMENT: u32 = 1_000_000;

/// Maximum segment size (100MB compressed)
pub const MAX_SEGMENT_SIZE: u64 = 100 * 1024 * 1024;

/// Entries buffered before a compressed block is written
pub const BLOCK_ENTRIES: usize = 1000;

/// Compression level for ZSTD (1-22, higher = better compression but slower)
pub const ZSTD_COMPRESSION_LEVEL: i32 = 3;

/// Flag bits in SegmentHeader.flags
pub const FLAG_COMPRESSED: u8 = 0x01; // Blocks are compressed with ZSTD
pub const FLAG_SEALED: u8 = 0x02; // Header rewritten by finalize

/// Segment header structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentHeader {
    pub segment_id: u64,
    /// Earliest processing instant among the entries
    pub first_time: Timestamp,
    /// Latest processing instant among the entries
    pub last_time: Timestamp,
    pub entry_count: u32,
    pub compressed_size: u32,
    pub checksum: u32,
    pub flags: u8,
}

impl SegmentHeader {
    /// Create a new segment header
    pub fn new(segment_id: u64) -> Self {
        Self {
            segment_id,
            first_time: Timestamp::from_micros(0),
            last_time: Timestamp::from_micros(0),
            entry_count: 0,
            compressed_size: 0,
            checksum: 0,
            flags: 0,
        }
    }

    /// True once the segment was finalized and its checksum is final
    pub fn is_sealed(&self) -> bool {
        self.flags & FLAG_SEALED != 0
    }

    fn record_time(&mut self, ts: Timestamp) {
        if self.entry_count == 0 || ts < self.first_time {
            self.first_time = ts;
        }
        if self.entry_count == 0 || ts > self.last_time {
            self.last_time = ts;
        }
    }

    /// Serialize header to bytes
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE);

        buf.put_slice(MAGIC);
        buf.put_u8(SEGMENT_VERSION);
        // Reserved
        buf.put_u16(0);
        buf.put_u64(self.segment_id);
        buf.put_i64(self.first_time.as_micros());
        buf.put_i64(self.last_time.as_micros());
        buf.put_u32(self.entry_count);
        buf.put_u32(self.compressed_size);
        buf.put_u32(self.checksum);
        buf.put_u8(self.flags);

        // Padding to 64 bytes: 5+1+2+8+8+8+4+4+4+1 = 45, need 19 more
        buf.put_bytes(0, 19);

        debug_assert_eq!(buf.len(), HEADER_SIZE);
        buf.freeze()
    }

    /// Deserialize header from bytes
    pub fn deserialize(mut buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::Storage("Invalid header size".to_string()));
        }

        let magic = &buf[0..5];
        if magic != MAGIC {
            return Err(Error::Storage(format!("Invalid magic number: {:?}", magic)));
        }
        buf.advance(5);

        let version = buf.get_u8();
        if version != SEGMENT_VERSION {
            return Err(Error::Storage(format!("Unsupported version: {}", version)));
        }
        buf.advance(2);

        Ok(Self {
            segment_id: buf.get_u64(),
            first_time: Timestamp::from_micros(buf.get_i64()),
            last_time: Timestamp::from_micros(buf.get_i64()),
            entry_count: buf.get_u32(),
            compressed_size: buf.get_u32(),
            checksum: buf.get_u32(),
            flags: buf.get_u8(),
        })
    }
}

/// Segment file writer
pub struct SegmentWriter {
    file: File,
    header: SegmentHeader,
    buffer: Vec<JournalEntry>,
    current_offset: u64,
    checksum_hasher: Crc32Hasher,
}

impl SegmentWriter {
    /// Create a new segment file
    pub fn create<P: AsRef<Path>>(path: P, segment_id: u64) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let header = SegmentHeader::new(segment_id);
        file.write_all(&header.serialize())?;
        file.sync_all()?;

        Ok(Self {
            file,
            header,
            buffer: Vec::new(),
            current_offset: HEADER_SIZE as u64,
            checksum_hasher: Crc32Hasher::new(),
        })
    }

    /// Append an entry to the segment
    pub fn append(&mut self, entry: JournalEntry) -> Result<()> {
        self.header.record_time(entry.processing().from());
        self.buffer.push(entry);
        self.header.entry_count += 1;

        if self.buffer.len() >= BLOCK_ENTRIES {
            self.flush_buffer()?;
        }
        Ok(())
    }

    /// Write buffered entries as one compressed block
    fn flush_buffer(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let mut serialized = Vec::new();
        for entry in &self.buffer {
            let bytes = entry.to_bytes()?;
            serialized.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            serialized.extend_from_slice(&bytes);
        }

        let compressed = zstd::encode_all(&serialized[..], ZSTD_COMPRESSION_LEVEL)
            .map_err(|e| Error::Storage(format!("ZSTD compression failed: {}", e)))?;
        self.checksum_hasher.update(&compressed);

        self.file.write_all(&(compressed.len() as u32).to_le_bytes())?;
        self.file.write_all(&compressed)?;
        self.current_offset += 4 + compressed.len() as u64;

        self.header.flags |= FLAG_COMPRESSED;
        self.header.compressed_size = (self.current_offset - HEADER_SIZE as u64) as u32;
        self.buffer.clear();
        Ok(())
    }

    /// Finalize the segment (write header and close).
    /// Returns the sealed header with its final checksum
    pub fn finalize(mut self) -> Result<SegmentHeader> {
        self.flush_buffer()?;

        self.header.checksum = self.checksum_hasher.finalize();
        self.header.flags |= FLAG_SEALED;

        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.header.serialize())?;
        self.file.sync_all()?;

        Ok(self.header)
    }

    /// Get current segment info
    pub fn header(&self) -> &SegmentHeader {
        &self.header
    }
}

/// Segment file reader
pub struct SegmentReader {
    file: File,
    header: SegmentHeader,
    path: PathBuf,
}

impl SegmentReader {
    /// Open an existing segment file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)?;

        let mut header_buf = vec![0u8; HEADER_SIZE];
        file.read_exact(&mut header_buf)?;
        let header = SegmentHeader::deserialize(&header_buf)?;

        Ok(Self {
            file,
            header,
            path: path.to_path_buf(),
        })
    }

    /// Read all entries from the segment, verifying the checksum
    pub fn read_entries(&mut self) -> Result<Vec<JournalEntry>> {
        let mut entries = Vec::with_capacity(self.header.entry_count as usize);
        let mut checksum_hasher = Crc32Hasher::new();

        self.file.seek(SeekFrom::Start(HEADER_SIZE as u64))?;

        loop {
            let mut len_buf = [0u8; 4];
            match self.file.read_exact(&mut len_buf) {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(Error::Io(e)),
            }

            let mut compressed = vec![0u8; u32::from_le_bytes(len_buf) as usize];
            self.file.read_exact(&mut compressed)?;
            checksum_hasher.update(&compressed);

            let block = zstd::decode_all(&compressed[..])
                .map_err(|e| Error::Storage(format!("ZSTD decompression failed: {}", e)))?;

            let mut block = &block[..];
            while block.has_remaining() {
                if block.remaining() < 4 {
                    return Err(Error::Storage("Truncated entry length".to_string()));
                }
                let len = block.get_u32_le() as usize;
                if block.remaining() < len {
                    return Err(Error::Storage("Truncated entry data".to_string()));
                }
                entries.push(JournalEntry::from_bytes(&block[..len])?);
                block.advance(len);
            }
        }

        let calculated = checksum_hasher.finalize();
        if calculated != self.header.checksum {
            return Err(Error::Storage(format!(
                "Checksum mismatch in {}: expected {}, got {}",
                self.path.display(),
                self.header.checksum,
                calculated
            )));
        }
        Ok(entries)
    }

    /// Get segment header
    pub fn header(&self) -> &SegmentHeader {
        &self.header
    }

    /// Get file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}
