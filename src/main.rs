//! Bitemporal-Store: Main entry point

use anyhow::Context;
use bitemporal_store::cli::{run, Cli};
use bitemporal_store::config::{LogConfig, StorageConfig, StoreConfig};
use bitemporal_store::core::EntityKind;
use bitemporal_store::store::BitemporalStore;
use clap::Parser;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

fn init_tracing(log: &LogConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    // Logs go to stderr; stdout carries the JSON records
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config =
        StoreConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(dir) = &cli.data_dir {
        config.storage = StorageConfig::Segmented {
            dir: dir.clone(),
            wal: true,
        };
    }
    init_tracing(&config.log);

    let store = BitemporalStore::from_config(&config).context("opening store")?;
    let repo = store.repository::<Value>(EntityKind::new(cli.kind.as_str(), cli.temporality));
    repo.seed_allocator().await?;

    run(&cli.command, &repo, &mut std::io::stdout()).await?;
    store.flush().await.context("flushing store")?;
    Ok(())
}
