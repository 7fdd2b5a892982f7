//! Journal entries: the persisted form of a version record

use crate::core::record::{AttributeSet, EntityId, VersionRecord};
use crate::core::temporal::{Interval, Timestamp};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique entry identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId {
    /// UUID of the entry
    pub id: Uuid,
}

impl EntryId {
    /// Generate a new entry ID
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }

    /// Create from existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self { id: uuid }
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Where an entry sits: entity kind, identity and record sequence, plus
/// both time axes of the record it carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Entry ID
    pub id: EntryId,
    /// Entity kind (table name)
    pub kind: String,
    pub entity_id: EntityId,
    /// Record sequence within the entity's chain
    pub seq: u64,
    /// Business interval, absent for uni-temporal kinds
    pub business: Option<Interval>,
    pub processing: Interval,
    /// Wall-clock time the entry was written
    pub recorded_at: Timestamp,
}

/// Entry payload (serialized attributes)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryPayload {
    /// Serialized attribute data (format depends on serialization)
    pub data: Vec<u8>,
    /// Serialization format identifier
    pub format: String,
}

impl EntryPayload {
    /// Create payload from JSON-serializable data
    pub fn from_json<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self {
            data: serde_json::to_vec(value)?,
            format: "json".to_string(),
        })
    }

    /// Deserialize from JSON
    pub fn to_json<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.data)?)
    }
}

/// One immutable line of the journal.
///
/// Entries are addressed by `(kind, entity_id, seq)`. A later entry with the
/// same address is a revision of the earlier one; the only legal revision
/// closes an open processing interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub metadata: EntryMetadata,
    pub payload: EntryPayload,
}

impl JournalEntry {
    /// Encode a version record of entity kind `kind`, stamped with the
    /// instant of the mutation that wrote it
    pub fn from_record<A: AttributeSet>(
        kind: &str,
        record: &VersionRecord<A>,
        recorded_at: Timestamp,
    ) -> Result<Self> {
        Ok(Self {
            metadata: EntryMetadata {
                id: EntryId::new(),
                kind: kind.to_string(),
                entity_id: record.id().clone(),
                seq: record.seq(),
                business: record.business().copied(),
                processing: *record.processing(),
                recorded_at,
            },
            payload: EntryPayload::from_json(record.attributes())?,
        })
    }

    /// Decode the version record this entry carries
    pub fn to_record<A: AttributeSet>(&self) -> Result<VersionRecord<A>> {
        Ok(VersionRecord::new(
            self.metadata.entity_id.clone(),
            self.metadata.seq,
            self.payload.to_json()?,
            self.metadata.business,
            self.metadata.processing,
        ))
    }

    pub fn id(&self) -> EntryId {
        self.metadata.id
    }

    pub fn kind(&self) -> &str {
        &self.metadata.kind
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.metadata.entity_id
    }

    pub fn seq(&self) -> u64 {
        self.metadata.seq
    }

    pub fn processing(&self) -> &Interval {
        &self.metadata.processing
    }

    /// True while the carried record's processing interval is open
    pub fn is_open(&self) -> bool {
        self.metadata.processing.is_infinite()
    }

    /// Serialize to the binary form used by the WAL and segment files
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
