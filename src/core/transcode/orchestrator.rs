// src/core/transcode/orchestrator.rs

//! Drives a single transcode attempt: resolve the PDB, stage it, invoke the
//! transcoder binary, and atomically publish the result into the cache.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::cache::{CacheLookup, CacheRepository};
use crate::core::errors::GatewayError;
use crate::core::key::ArtifactKey;
use crate::core::metrics;
use crate::core::process;
use crate::core::symbol_client::SymbolServerClient;

/// The result of one `try_transcode` call.
#[derive(Debug)]
pub enum TranscodeOutcome {
    /// A positive artifact is now on disk at this path, either because this
    /// call produced it or because it already existed.
    Published(PathBuf),
    /// The symbol server has nothing for this key; a negative marker has
    /// been written.
    NotFound,
    /// The transcoder binary ran and failed; a negative marker has been
    /// written, carrying a truncated description of the failure.
    Failed(String),
}

/// Orchestrates transcode attempts for a single configured transcoder
/// binary and version. One instance is shared across the synchronous
/// request path and the background work queue.
#[derive(Clone)]
pub struct Transcoder {
    cache: CacheRepository,
    symbol_client: SymbolServerClient,
    transcoder_path: PathBuf,
    staging_root: PathBuf,
    output_truncate_chars: usize,
}

impl Transcoder {
    pub fn new(
        cache: CacheRepository,
        symbol_client: SymbolServerClient,
        transcoder_path: PathBuf,
        output_truncate_chars: usize,
    ) -> Self {
        let staging_root = cache.root().join(".temp");
        Self {
            cache,
            symbol_client,
            transcoder_path,
            staging_root,
            output_truncate_chars,
        }
    }

    /// Attempts to produce a positive cache entry for `key`. Re-checks the
    /// cache first so concurrent callers racing on the same key converge on
    /// a single winner without either erroring.
    pub async fn try_transcode(
        &self,
        key: &ArtifactKey,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<TranscodeOutcome, GatewayError> {
        if let CacheLookup::Positive { path, .. } = self.cache.lookup(key).await {
            return Ok(TranscodeOutcome::Published(path));
        }

        let pdb_path = match self.symbol_client.try_get_pdb_path(key).await? {
            Some(p) => p,
            None => {
                self.cache.mark_negative(key).await.map_err(GatewayError::from)?;
                metrics::record_transcode("not_found");
                return Ok(TranscodeOutcome::NotFound);
            }
        };

        info!("starting transcode for {key}");
        let staging_dir = self.staging_root.join(Uuid::new_v4().to_string());
        let started = std::time::Instant::now();
        let result = self.run_transcode(key, &pdb_path, &staging_dir, shutdown_rx).await;
        metrics::observe_transcode_duration(started.elapsed().as_secs_f64());

        if let Err(e) = tokio::fs::remove_dir_all(&staging_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!("failed to clean up staging dir {staging_dir:?}: {e}");
            }
        }

        match result {
            Ok(outcome) => {
                metrics::record_transcode("published");
                Ok(outcome)
            }
            Err(GatewayError::Transcode(msg)) => {
                self.cache.mark_negative(key).await.map_err(GatewayError::from)?;
                warn!("transcode failed for {key}: {msg}");
                metrics::record_transcode("failed");
                Ok(TranscodeOutcome::Failed(msg))
            }
            Err(e) => {
                metrics::record_transcode("error");
                Err(e)
            }
        }
    }

    async fn run_transcode(
        &self,
        key: &ArtifactKey,
        pdb_path: &str,
        staging_dir: &Path,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<TranscodeOutcome, GatewayError> {
        let staged_pdb_dir = staging_dir.join("pdb");
        tokio::fs::create_dir_all(&staged_pdb_dir).await?;

        let pdb_filename = Path::new(pdb_path)
            .file_name()
            .ok_or_else(|| GatewayError::Transcode(format!("malformed pdb path: {pdb_path}")))?;
        let staged_pdb = staged_pdb_dir.join(pdb_filename);
        tokio::fs::copy(pdb_path, &staged_pdb)
            .await
            .map_err(|e| GatewayError::Transcode(format!("failed to stage pdb from {pdb_path}: {e}")))?;

        let unused_symbol_path = staged_pdb_dir.join("unused");

        let mut command = Command::new(&self.transcoder_path);
        command
            .arg("-pdb")
            .arg(&staged_pdb)
            .env("_NT_SYMBOL_PATH", &unused_symbol_path)
            .env("_NT_SYMCACHE_PATH", staging_dir)
            .env_clear_keep_path();

        process::run_and_throw_on_failure(command, shutdown_rx, self.output_truncate_chars).await?;

        let expected_output = staging_dir.join(
            self.cache
                .path_for(key)
                .file_name()
                .expect("cache path always has a file name"),
        );
        if tokio::fs::metadata(&expected_output).await.is_err() {
            return Err(GatewayError::Transcode(format!(
                "transcoder exited successfully but {expected_output:?} does not exist"
            )));
        }

        let destination = self.cache.path_for(key);
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if let Err(e) = tokio::fs::rename(&expected_output, &destination).await {
            if tokio::fs::metadata(&destination).await.is_ok() {
                debug!("rename for {key} lost the race but {destination:?} already exists, using it");
                return Ok(TranscodeOutcome::Published(destination));
            }
            return Err(GatewayError::from(e));
        }
        info!("published {key} to {destination:?}");

        Ok(TranscodeOutcome::Published(destination))
    }
}

trait CommandExt {
    fn env_clear_keep_path(&mut self) -> &mut Self;
}

impl CommandExt for Command {
    /// Passes through `PATH` but clears everything else, matching the
    /// minimal environment external tooling is invoked with elsewhere in
    /// this codebase.
    fn env_clear_keep_path(&mut self) -> &mut Self {
        self.env_clear();
        if let Ok(path) = std::env::var("PATH") {
            self.env("PATH", path);
        }
        self
    }
}
