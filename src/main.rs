//! Schema sync engine service entry point.
//!
//! Loads configuration, starts the engine (spawning whichever background
//! workers are enabled), and runs until `SIGINT`/`SIGTERM`, at which point it
//! shuts the engine down gracefully.

use schema_sync_engine::sync::config::Configuration;
use schema_sync_engine::sync::engine::SyncEngine;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> schema_sync_engine::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    let config_path = std::env::var("SCHEMA_SYNC_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("schema-sync.toml"));

    let config = Configuration::load(&config_path)?;
    info!(config_path = %config_path.display(), "loaded configuration");
    info!(
        database_poll_secs = config.monitoring.database_poll_interval_secs,
        debounce_ms = config.monitoring.file_system_debounce_ms,
        reconciliation_secs = config.monitoring.full_reconciliation_interval_secs,
        "starting schema sync engine"
    );

    let engine = SyncEngine::new(config);

    info!("engine started, awaiting shutdown signal");
    tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");

    info!("shutdown signal received");
    engine.shutdown().await;
    Ok(())
}
