//! CLI commands

use crate::core::record::{EntityId, Temporality};
use crate::core::temporal::{Bound, Timestamp};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Bitemporal-Store CLI
#[derive(Debug, Parser)]
#[command(name = "bitemporal-store")]
#[command(about = "Bitemporal versioned store: business and processing time version chains")]
pub struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Keep data in segment files under this directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Entity kind to operate on
    #[arg(short, long, global = true, default_value = "entity")]
    pub kind: String,

    /// Time axes tracked by the kind: bi or uni
    #[arg(short, long, global = true, default_value = "bi")]
    pub temporality: Temporality,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create an entity
    Insert {
        /// Entity ID (allocated when omitted)
        #[arg(long)]
        id: Option<EntityId>,
        /// Attributes as a JSON object
        #[arg(short, long)]
        attrs: String,
        /// Business date the entity takes effect (default: now)
        #[arg(short, long)]
        effective: Option<Timestamp>,
    },
    /// Correct an entity, optionally from a business date on
    Update {
        id: EntityId,
        #[arg(short, long)]
        attrs: String,
        /// Split the business period at this date
        #[arg(long)]
        as_of: Option<Timestamp>,
    },
    /// Schedule new attributes from a business date on
    Transfer {
        id: EntityId,
        #[arg(short, long)]
        attrs: String,
        #[arg(short, long)]
        effective: Timestamp,
    },
    /// End an entity
    Terminate {
        id: EntityId,
        /// Business date the entity ends (default: now)
        #[arg(long)]
        as_of: Option<Timestamp>,
    },
    /// Show one entity
    Get {
        id: EntityId,
        /// Business date (default: now)
        #[arg(short, long)]
        business: Option<Timestamp>,
        /// Processing date (default: what is believed now)
        #[arg(short, long)]
        processing: Option<Bound>,
    },
    /// Every record of an entity, oldest processing first
    History { id: EntityId },
    /// Currently believed records of an entity across business time
    Timeline { id: EntityId },
    /// Entities of the kind, optionally filtered
    List {
        /// Equality filter `field=value`, repeatable
        #[arg(long = "where")]
        filters: Vec<String>,
        #[arg(short, long)]
        business: Option<Timestamp>,
        #[arg(short, long)]
        processing: Option<Bound>,
    },
    /// Believed changes taking effect after a date
    Scheduled {
        /// Default: now
        #[arg(long)]
        after: Option<Timestamp>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arguments() {
        let cli = Cli::try_parse_from([
            "bitemporal-store",
            "--kind",
            "salary",
            "transfer",
            "ACME/E-1",
            "--attrs",
            r#"{"amount": 1}"#,
            "--effective",
            "2025-01-01",
        ])
        .unwrap();
        assert_eq!(cli.kind, "salary");
        assert_eq!(cli.temporality, Temporality::BiTemporal);
        match cli.command {
            Commands::Transfer { id, effective, .. } => {
                assert_eq!(id, EntityId::Composite(vec!["ACME".into(), "E-1".into()]));
                assert_eq!(effective, Timestamp::parse("2025-01-01").unwrap());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_reject_bad_values() {
        assert!(Cli::try_parse_from(["bitemporal-store", "-t", "tri", "history", "1"]).is_err());
        assert!(Cli::try_parse_from(["bitemporal-store", "get", "1", "-b", "yesterday"]).is_err());
    }
}
