//! # courant-server
//!
//! Real-time synchronization hub for the Courant chat system.
//!
//! This binary provides:
//! - the **connection registry**, the in-memory source of truth for which
//!   users are reachable over a live channel
//! - **presence broadcasting** (full online-set snapshots on every flip)
//! - the server half of the **message delivery pipeline** (persist, ack,
//!   push, delivery/read receipts, reaction and deletion snapshots)
//! - the **call signaling relay** (opaque offer/answer/candidate payloads)
//! - a small **HTTP surface** (axum) for the WebSocket upgrade, health
//!   checks and instance info

mod config;
mod delivery;
mod error;
mod hub;
mod presence;
mod registry;
mod signaling;
mod store;
mod ws;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;
use crate::hub::Hub;
use crate::store::MemoryStore;
use crate::ws::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,courant_server=debug")),
        )
        .init();

    info!("Courant hub v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env();
    info!(?config, "configuration loaded");

    // The in-memory store is the development default; a deployment fronts
    // a real database behind the same MessageStore trait.
    let hub = Arc::new(Hub::new(Arc::new(MemoryStore::new())));

    let state = AppState {
        hub,
        config: Arc::new(config.clone()),
    };
    let router = ws::build_router(state);

    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    info!(addr = %config.http_addr, "hub listening");

    tokio::select! {
        result = axum::serve(listener, router) => result?,
        _ = tokio::signal::ctrl_c() => info!("shutdown signal received, exiting"),
    }

    Ok(())
}
