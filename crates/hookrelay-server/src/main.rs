//! Hookrelay server binary.
//!
//! Wires the config file, tenant registry, connection manager, heartbeat
//! supervisor and event router into an axum application, then serves it
//! until a shutdown signal arrives.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod admissions;
mod routes;
mod state;
mod telemetry;
mod ws;

use std::sync::Arc;

use anyhow::Context;

use hookrelay_config::ConfigStore;
use hookrelay_core::{DropCause, HeartbeatSupervisor};

use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("HOOKRELAY_CONFIG").ok())
        .unwrap_or_else(|| "config.json".to_string());

    let store = ConfigStore::new(&config_path);
    let config = store
        .load()
        .with_context(|| format!("loading config from {config_path}"))?;

    telemetry::init(&config.logging)?;
    tracing::info!(path = %config_path, "configuration loaded");

    let state = AppState::open(&config, store).context("opening tenant registry")?;

    let supervisor = Arc::new(HeartbeatSupervisor::new(
        state.manager.clone(),
        config.heartbeat,
    ));
    let heartbeat = supervisor.spawn();

    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, version = env!("CARGO_PKG_VERSION"), "relay listening");

    axum::serve(listener, routes::router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    heartbeat.shutdown().await;
    let evicted = state.manager.evict_all(DropCause::Shutdown);
    tracing::info!(evicted, "shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutdown signal received");
}
