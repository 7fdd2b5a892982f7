//! Error types for Bitemporal-Store

use thiserror::Error;

/// Result type alias for Bitemporal-Store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Bitemporal-Store
///
/// Recoverable outcomes (`NotFound`) and invariant violations (`Overlap`,
/// `InconsistentChain`) are distinct variants so callers can match on them.
#[derive(Error, Debug)]
pub enum Error {
    /// Zero-width or inverted interval
    #[error("Invalid interval: {0}")]
    InvalidInterval(String),

    /// A record would overlap an existing record of the same chain
    #[error("Overlap error: {0}")]
    Overlap(String),

    /// A chain already violates its invariants (e.g. two current records)
    #[error("Inconsistent chain: {0}")]
    InconsistentChain(String),

    /// No record at the requested identity and temporal coordinate
    #[error("Not found: {0}")]
    NotFound(String),

    /// Insert against an identity that is still active
    #[error("Identity conflict: {0}")]
    IdentityConflict(String),

    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Storage collaborator failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Unparseable or out-of-range timestamp
    #[error("Temporal error: {0}")]
    Temporal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for outcomes the caller is expected to handle, such as "nothing
    /// scheduled at that date".
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// True when a chain invariant was (or would have been) broken.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Error::Overlap(_) | Error::InconsistentChain(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
