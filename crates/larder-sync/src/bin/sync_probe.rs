//! # sync-probe
//!
//! Runs one sync cycle against the configured API and prints the resulting
//! status as JSON.
//!
//! ```text
//! sync-probe [path/to/sync.toml]
//!
//! RUST_LOG=larder_sync=debug sync-probe
//! LARDER_API_URL=https://staging.larder.app/v1 sync-probe
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use larder_store::{SharedStore, SqliteStore, StoreConfig};
use larder_sync::{HttpTransport, NetworkMonitor, RequestClient, SyncConfig, SyncCoordinator};

/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - Default: INFO, with debug for the larder crates
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,larder_sync=debug,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::TRACE)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = SyncConfig::load(config_path)?;

    let db_path = config
        .resolved_database_path()
        .ok_or("Could not determine app data directory")?;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    info!(base_url = %config.api.base_url, db = ?db_path, "Starting sync probe");

    let store: SharedStore = Arc::new(SqliteStore::new(StoreConfig::new(db_path)).await?);
    let transport = Arc::new(HttpTransport::new(&config.api.base_url)?);
    let client = RequestClient::open(
        transport,
        NetworkMonitor::online(),
        Arc::clone(&store),
        config.client.clone(),
    )
    .await;
    let coordinator = SyncCoordinator::open(client, store, config.sync.clone()).await?;

    let report = coordinator.perform_sync().await;
    if let Some(error) = &report.pull_error {
        tracing::warn!(error = %error, "Pull failed");
    }

    let output = serde_json::json!({
        "report": report,
        "status": coordinator.status().await,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
