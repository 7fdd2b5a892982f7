//! Store configuration, loaded from a JSON file

use crate::error::{Error, Result};
use crate::identity::DEFAULT_START;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where journal entries live
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Nothing survives the process
    #[default]
    Memory,
    /// Segment files under `dir`, with an optional write-ahead log
    Segmented {
        #[serde(default)]
        dir: PathBuf,
        #[serde(default = "default_true")]
        wal: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Without an allocator, inserts must supply their own identity
    pub enabled: bool,
    pub start: i64,
    pub increment: i64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            start: DEFAULT_START,
            increment: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub storage: StorageConfig,
    pub identity: IdentityConfig,
    pub log: LogConfig,
}

fn default_true() -> bool {
    true
}

impl StoreConfig {
    /// Read and validate the file at `path`, or return defaults for `None`
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    Error::Configuration(format!("cannot read {}: {e}", path.display()))
                })?;
                Self::from_json(&text)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Configuration(e.to_string()))
    }

    /// Reject settings the store cannot run with
    pub fn validate(&self) -> Result<()> {
        if let StorageConfig::Segmented { dir, .. } = &self.storage {
            if dir.as_os_str().is_empty() {
                return Err(Error::Configuration(
                    "segmented storage needs a directory".to_string(),
                ));
            }
        }
        if self.identity.increment <= 0 {
            return Err(Error::Configuration(format!(
                "identity increment must be positive, got {}",
                self.identity.increment
            )));
        }
        Ok(())
    }
}
