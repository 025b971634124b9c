/// Server setup and initialization
///
/// Wires together the metadata store, the heartbeat, the idle monitor, the discovery
/// record and the HTTP routes. `start_server` is the daemon's main loop.

use crate::{
    api::{create_api_routes, AppState},
    config::Config,
    daemon::{DaemonState, StateDir},
    runtime::{Heartbeat, IdleMonitor},
    store::MetadataStore,
};
use anyhow::{Context, Result};
use axum::Router;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing::Level;

/// Create the Axum application serving the datastore under `config.store.root_path`
///
/// Heartbeat requests update `heartbeat`; the caller decides who watches it.
pub fn create_app(config: &Config, heartbeat: Arc<Heartbeat>) -> Result<Router> {
    tracing::info!("📁 Opening datastore under {}", config.store.root_path.display());
    let store = MetadataStore::open(&config.store.root_path).with_context(|| {
        format!(
            "Failed to open datastore under {}",
            config.store.root_path.display()
        )
    })?;

    let app_state = AppState {
        store: Arc::new(store),
        heartbeat,
    };
    Ok(create_api_routes().with_state(app_state))
}

/// Install the global log subscriber
///
/// Verbose when `debug` is set, warnings only otherwise. Calling it twice is harmless.
pub fn init_tracing(debug: bool) {
    let level = if debug { Level::DEBUG } else { Level::WARN };
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .try_init();
}

/// Run the daemon until it goes idle or is asked to stop
///
/// Binds the listener first, then publishes the discovery record, so a record on disk
/// always points at a reachable port. The record is removed on the way out unless a
/// newer daemon has already replaced it.
pub async fn start_server(config: Config) -> Result<()> {
    tracing::info!("Starting metadata service...");

    let heartbeat = Arc::new(Heartbeat::new());
    let app = create_app(&config, Arc::clone(&heartbeat))?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    let local_addr = listener.local_addr()?;
    tracing::info!("Server listening on http://{}", local_addr);

    let pid = std::process::id();
    let state_dir = StateDir::new(&config.daemon.state_dir);
    let record = DaemonState::new(pid, local_addr.port(), &config.store.root_path);
    state_dir
        .write(&record)
        .with_context(|| format!("Failed to write discovery record in {}", state_dir.path().display()))?;

    let monitor = IdleMonitor::new(
        heartbeat,
        Duration::from_secs(config.daemon.idle_timeout_secs),
        Duration::from_secs(config.daemon.check_interval_secs),
    );
    let served = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal(monitor))
        .await;

    state_dir.clear_if_owned(pid);
    tracing::info!("👋 Metadata service stopped");
    served.context("HTTP server failed")
}

/// Resolves on idle timeout, SIGTERM or Ctrl-C, whichever comes first
async fn shutdown_signal(monitor: IdleMonitor) {
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = monitor.wait_for_idle() => tracing::info!("💤 Idle timeout reached, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
        _ = tokio::signal::ctrl_c() => tracing::info!("Received Ctrl-C, shutting down"),
    }
}
