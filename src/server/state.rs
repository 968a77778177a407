// src/server/state.rs

//! Shared application state handed to every HTTP handler.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing_subscriber::{filter::EnvFilter, reload};

use crate::config::Config;
use crate::core::cache::CacheRepository;
use crate::core::symbol_client::SymbolServerClient;
use crate::core::tasks::BackgroundQueue;
use crate::core::transcode::Transcoder;

pub struct AppState {
    pub config: Config,
    pub cache: CacheRepository,
    pub symbol_client: SymbolServerClient,
    pub transcoder: Transcoder,
    pub queue: BackgroundQueue,
    pub shutdown_tx: broadcast::Sender<()>,
    pub log_reload_handle: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
}

pub type SharedState = Arc<AppState>;
