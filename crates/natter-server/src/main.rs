//! # natter-server
//!
//! Backend for Natter, a two-party direct messaging app.
//!
//! This binary provides:
//! - **REST API** (axum) for accounts, conversation history, sending and
//!   read receipts
//! - **WebSocket endpoint** pushing presence snapshots and new messages to
//!   every live device of a user
//! - **Local image storage** for attachments and profile pictures
//! - **SQLite persistence** of accounts and messages

mod accounts;
mod api;
mod auth;
mod blob_store;
mod config;
mod delivery;
mod error;
mod presence;
mod session;
mod store;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::blob_store::BlobStore;
use crate::config::ServerConfig;
use crate::store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,natter_server=debug")),
        )
        .init();

    info!("Starting Natter server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let store = Store::open(&config.database_path)?;
    info!(path = %config.database_path.display(), "Database opened");

    let blobs = Arc::new(
        BlobStore::new(
            config.blob_storage_path.clone(),
            config.max_image_bytes,
            config.public_base_url.clone(),
        )
        .await?,
    );

    let http_addr = config.http_addr;
    let app_state = AppState::new(store, blobs, config);

    // -----------------------------------------------------------------------
    // 4. Run the HTTP + WebSocket server until shutdown
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
