// src/server/mod.rs

//! Server startup: builds shared state, spawns background workers, and
//! runs the HTTP listener until a shutdown signal arrives.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use axum::routing::get;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, reload};

mod handler;
mod metrics_server;
pub mod state;

use crate::config::Config;
use crate::core::cache::CacheRepository;
use crate::core::symbol_client::SymbolServerClient;
use crate::core::tasks;
use crate::core::transcode::Transcoder;
use state::AppState;
pub use state::SharedState;

/// Builds the request router given a fully-assembled shared state. Split
/// out from `run` so integration tests can drive the same routes with
/// `tower::ServiceExt::oneshot` instead of binding a real socket.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/v{version}/{name}/{id}", get(handler::get_artifact))
        .route("/v{version}/{name}/{id}/{age}", get(handler::get_artifact_with_age))
        .with_state(state)
}

/// Bound on how long the main loop waits for in-flight background workers
/// to drain before abandoning them on shutdown.
const WORKER_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// The main server startup function, orchestrating all setup phases.
pub async fn run(
    config: Config,
    log_reload_handle: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
) -> Result<()> {
    log_startup_info(&config);

    tokio::fs::create_dir_all(&config.symcache_directory).await?;

    let (shutdown_tx, _) = broadcast::channel(1);

    let cache = CacheRepository::new(
        config.symcache_directory.clone(),
        config.transcoder_version.clone(),
        Duration::from_secs(config.negative_cache_ttl_seconds),
    );
    let symbol_client = SymbolServerClient::new(
        config.symbol_server.clone(),
        Duration::from_secs(config.symbol_server_timeout_seconds),
    )?;
    let transcoder = Transcoder::new(
        cache.clone(),
        symbol_client.clone(),
        config.transcoder_path.clone(),
        config.process_output_truncate_chars,
    );

    let (queue, workers) = tasks::start(transcoder.clone(), config.worker_count, &shutdown_tx, config.queue_depth);

    let metrics_enabled = config.metrics.enabled;
    let metrics_port = config.metrics.port;
    let bind_host = config.bind_host.clone();
    let bind_port = config.bind_port;

    let state: SharedState = Arc::new(AppState {
        config,
        cache,
        symbol_client,
        transcoder,
        queue,
        shutdown_tx: shutdown_tx.clone(),
        log_reload_handle,
    });

    let app = build_router(state);

    let addr = format!("{bind_host}:{bind_port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("symcache gateway listening on {addr}");

    let mut metrics_shutdown_rx = shutdown_tx.subscribe();
    let metrics_handle = if metrics_enabled {
        Some(tokio::spawn(async move {
            metrics_server::run(metrics_port, metrics_shutdown_rx).await;
        }))
    } else {
        metrics_shutdown_rx.close();
        info!("Prometheus metrics server is disabled in the configuration.");
        None
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(await_shutdown_signal())
        .await?;

    info!("Shutting down. Signalling background workers.");
    if shutdown_tx.send(()).is_err() {
        warn!("no active receivers for the shutdown signal; workers may already be idle");
    }

    if tokio::time::timeout(WORKER_SHUTDOWN_GRACE, tasks::stop(workers)).await.is_err() {
        warn!("timed out waiting for background workers to stop within {WORKER_SHUTDOWN_GRACE:?}");
    }

    if let Some(handle) = metrics_handle {
        let _ = handle.await;
    }

    info!("Server shutdown complete.");
    Ok(())
}

/// Waits for a shutdown signal based on the operating system.
/// On Unix, it listens for SIGINT and SIGTERM.
/// On Windows, it listens for Ctrl+C.
async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = sigint.recv() => info!("SIGINT received, initiating graceful shutdown."),
            _ = sigterm.recv() => info!("SIGTERM received, initiating graceful shutdown."),
        }
    }
    #[cfg(windows)]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl-C received, initiating graceful shutdown.");
    }
}

fn log_startup_info(config: &Config) {
    info!(
        "symcache gateway starting: transcoder {} at {}, min supported {}, async threshold {}",
        config.transcoder_version,
        config.transcoder_path.display(),
        config.min_supported_version,
        config.async_threshold_version,
    );
    if !config.metrics.enabled {
        info!("metrics exporter disabled");
    }
}
