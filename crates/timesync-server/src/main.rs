//! # timesync-server
//!
//! Live timer synchronization server.
//!
//! This binary provides:
//! - **REST API** (axum) for accounts, sessions, and timer create/stop/list
//! - **WebSocket endpoint** that pushes a full snapshot after every timer
//!   mutation and the active timers once per tick to each authenticated
//!   connection
//! - **Pluggable storage**: SQLite on disk or a volatile in-memory store

mod api;
mod auth;
mod broadcast;
mod config;
mod connections;
mod error;
mod session;
mod timers;
mod ws;

use std::time::Duration;

use timesync_store::{Database, MemoryStore, Repository};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::{ServerConfig, StorageBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,timesync_server=debug")),
        )
        .init();

    info!("Starting timesync server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open storage and wire subsystems
    // -----------------------------------------------------------------------
    let repo = open_storage(&config.storage)?;
    let http_addr = config.http_addr;
    let app_state = AppState::build(config, repo);

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic sweep of expired sessions (every 5 minutes)
    let sessions = app_state.sessions.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            sessions.purge_expired().await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP server (blocks until shutdown)
    // -----------------------------------------------------------------------
    let connections = app_state.connections.clone();
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                connections.shutdown();
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    connections.shutdown();
    Ok(())
}

fn open_storage(storage: &StorageBackend) -> anyhow::Result<Box<dyn Repository>> {
    let repo: Box<dyn Repository> = match storage {
        StorageBackend::Memory => {
            info!("Using in-memory storage; data is lost on restart");
            Box::new(MemoryStore::new())
        }
        StorageBackend::Sqlite(Some(path)) => Box::new(Database::open_at(path)?),
        StorageBackend::Sqlite(None) => Box::new(Database::new()?),
    };
    Ok(repo)
}
