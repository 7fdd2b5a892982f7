//! Storage layer: record journal, write-ahead log and segment files

pub mod entry;
pub mod journal;
pub mod segment_file;
pub mod segment_journal;
pub mod wal;

pub use entry::*;
pub use journal::*;
pub use segment_file::*;
pub use segment_journal::*;
pub use wal::*;
