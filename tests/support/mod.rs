// tests/support/mod.rs

//! Shared fixtures for the HTTP-protocol integration tests: a fake
//! transcoder binary and a mock symbol server, both driven over a real
//! loopback socket so the gateway exercises its actual HTTP client and
//! process-supervision code paths.

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use tokio::sync::broadcast;

use symcache_gateway::config::{Config, MetricsConfig};
use symcache_gateway::core::cache::CacheRepository;
use symcache_gateway::core::symbol_client::SymbolServerClient;
use symcache_gateway::core::tasks;
use symcache_gateway::core::transcode::Transcoder;
use symcache_gateway::core::version::SemanticVersion;
use symcache_gateway::server::state::AppState;
use symcache_gateway::server::SharedState;

/// What the mock symbol server should answer for every request it sees.
pub enum SymbolServerBehavior {
    Found(String),
    NotFound,
}

/// Starts a mock symbol server on an ephemeral loopback port, returning its
/// base URL. The server runs until the test process exits; tests are
/// short-lived so nothing explicitly tears it down.
pub async fn spawn_mock_symbol_server(behavior: SymbolServerBehavior) -> String {
    let state = Arc::new(behavior);
    let app = axum::Router::new()
        .route("/{*rest}", get(mock_symbol_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    format!("http://{addr}")
}

async fn mock_symbol_handler(State(state): State<Arc<SymbolServerBehavior>>) -> impl IntoResponse {
    match state.as_ref() {
        SymbolServerBehavior::Found(path) => (StatusCode::OK, format!("PATH:{path}")).into_response(),
        SymbolServerBehavior::NotFound => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Writes a fake transcoder binary into `dir` that reads `$_NT_SYMCACHE_PATH`
/// and `-pdb <path>` and writes a fixed-content cache file named the way
/// `CacheRepository::path_for` would name it for `version`.
pub fn write_fake_transcoder(dir: &std::path::Path, version: &SemanticVersion) -> PathBuf {
    let script_path = dir.join("fake-transcoder.sh");
    let script = format!(
        "#!/bin/sh\nset -e\npdb=\"$2\"\nbase=$(basename \"$pdb\")\nout=\"$_NT_SYMCACHE_PATH/${{base}}-v{version}.symcache\"\nprintf 'fake symcache bytes' > \"$out\"\n"
    );
    std::fs::write(&script_path, script).unwrap();
    let mut perms = std::fs::metadata(&script_path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&script_path, perms).unwrap();
    script_path
}

/// A fully assembled in-process gateway for driving HTTP requests through
/// `tower::ServiceExt::oneshot` without binding a real socket.
pub struct TestGateway {
    pub state: SharedState,
    pub cache_root: tempfile::TempDir,
    pub transcoder_dir: tempfile::TempDir,
    pub shutdown_tx: broadcast::Sender<()>,
    pub workers: Option<tokio::task::JoinSet<()>>,
}

impl TestGateway {
    pub async fn new(symbol_server_base_url: String, transcoder_version: SemanticVersion) -> Self {
        let cache_root = tempfile::tempdir().unwrap();
        let transcoder_dir = tempfile::tempdir().unwrap();
        let transcoder_path = write_fake_transcoder(transcoder_dir.path(), &transcoder_version);

        let config = Config {
            bind_host: "127.0.0.1".to_string(),
            bind_port: 0,
            log_level: "info".to_string(),
            symbol_server: symbol_server_base_url,
            symcache_directory: cache_root.path().to_path_buf(),
            transcoder_path,
            transcoder_version: transcoder_version.clone(),
            min_supported_version: SemanticVersion::new(3, 0, 0),
            async_threshold_version: SemanticVersion::new(3, 1, 0),
            negative_cache_ttl_seconds: 86_400,
            symbol_server_timeout_seconds: 5,
            retry_after_seconds: 1,
            process_output_truncate_chars: 1000,
            worker_count: 1,
            queue_depth: 64,
            metrics: MetricsConfig::default(),
        };

        let cache = CacheRepository::new(
            config.symcache_directory.clone(),
            config.transcoder_version.clone(),
            Duration::from_secs(config.negative_cache_ttl_seconds),
        );
        let symbol_client = SymbolServerClient::new(
            config.symbol_server.clone(),
            Duration::from_secs(config.symbol_server_timeout_seconds),
        )
        .unwrap();
        let transcoder = Transcoder::new(
            cache.clone(),
            symbol_client.clone(),
            config.transcoder_path.clone(),
            config.process_output_truncate_chars,
        );

        let (shutdown_tx, _) = broadcast::channel(4);
        let (queue, workers) = tasks::start(transcoder.clone(), config.worker_count, &shutdown_tx, config.queue_depth);

        // `reload::Layer` is only meaningful against a live global subscriber;
        // tests build a standalone one that's never installed.
        let (_filter, log_reload_handle) = tracing_subscriber::reload::Layer::new(
            tracing_subscriber::filter::EnvFilter::new("info"),
        );

        let state: SharedState = Arc::new(AppState {
            config,
            cache,
            symbol_client,
            transcoder,
            queue,
            shutdown_tx: shutdown_tx.clone(),
            log_reload_handle: Arc::new(log_reload_handle),
        });

        Self {
            state,
            cache_root,
            transcoder_dir,
            shutdown_tx,
            workers: Some(workers),
        }
    }

    pub fn router(&self) -> axum::Router {
        symcache_gateway::server::build_router(self.state.clone())
    }

    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(workers) = self.workers.take() {
            tasks::stop(workers).await;
        }
    }
}
