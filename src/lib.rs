//! Bitemporal-Store: versioned entities on two time axes
//!
//! Every entity is a chain of immutable version records. Business time says
//! when a fact holds in the world; processing time says when the store
//! believed it. Corrections never edit a record: they close the old
//! record's processing interval and write a new one, so every past belief
//! stays queryable.
//!
//! # Core Concepts
//!
//! - **Intervals**: half-open `[from, thru)` ranges with a typed infinity bound
//! - **Version chains**: all records of one entity, checked for overlaps on append
//! - **Mutations**: insert, correct, update-as-of, transfer and terminate
//! - **Queries**: current, as-of, history, timeline and scheduled changes
//!
//! # Example
//!
//! ```no_run
//! use bitemporal_store::prelude::*;
//! use serde_json::json;
//!
//! # async fn example() -> bitemporal_store::error::Result<()> {
//! let store = BitemporalStore::in_memory();
//! let salaries = store.repository::<serde_json::Value>(EntityKind::bi_temporal("salary"));
//!
//! let hired = Timestamp::parse("2024-01-01")?;
//! let record = salaries.insert(None, json!({"amount": 5_000_000}), Some(hired)).await?;
//!
//! // Raise from July on
//! let july = Timestamp::parse("2024-07-01")?;
//! salaries.update_as_of(record.id(), json!({"amount": 5_500_000}), july).await?;
//!
//! let june = salaries
//!     .find_by_id_as_of(record.id(), Timestamp::parse("2024-06-15")?, Bound::Infinity)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod identity;
pub mod query;
pub mod storage;
pub mod store;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::config::StoreConfig;
    pub use crate::core::*;
    pub use crate::error::{Error, Result};
    pub use crate::identity::{IdentityAllocator, InMemoryIdentityAllocator};
    pub use crate::query::{Predicate, TemporalMode, TemporalQuery};
    pub use crate::storage::{InMemoryJournal, RecordJournal};
    pub use crate::store::{BitemporalStore, Repository};
}
