// src/core/tasks/queue.rs

//! A deduplicating background work queue: each `ArtifactKey` is transcoded
//! at most once concurrently, regardless of how many requests ask for it
//! while a transcode is already in flight.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::core::key::ArtifactKey;
use crate::core::metrics;
use crate::core::transcode::{TranscodeOutcome, Transcoder};

/// Bound on how long `BackgroundQueue::stop` waits for each worker to drain
/// and exit before giving up on it.
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_millis(500);

/// A handle for enqueuing transcode work. Cheap to clone; every clone
/// shares the same channel and pending-key set.
#[derive(Clone)]
pub struct BackgroundQueue {
    tx: mpsc::Sender<ArtifactKey>,
    pending: Arc<DashSet<ArtifactKey>>,
    depth: Arc<AtomicUsize>,
}

impl BackgroundQueue {
    /// Enqueues `key` for background transcoding unless it is already
    /// pending. Returns `true` if this call newly enqueued the work.
    pub fn enqueue(&self, key: ArtifactKey) -> bool {
        if !self.pending.insert(key.clone()) {
            debug!("{key} already pending, not re-enqueuing");
            return false;
        }
        metrics::set_queue_pending_keys(self.pending.len());
        if self.tx.try_send(key.clone()).is_err() {
            warn!("background queue is full or closed, dropping {key}");
            self.pending.remove(&key);
            metrics::set_queue_pending_keys(self.pending.len());
            return false;
        }
        metrics::set_queue_depth(self.depth.fetch_add(1, Ordering::SeqCst) + 1);
        true
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Starts `worker_count` workers pulling from a shared channel and returns
/// a `BackgroundQueue` handle plus the `JoinSet` tracking their tasks.
pub fn start(
    transcoder: Transcoder,
    worker_count: usize,
    shutdown_tx: &broadcast::Sender<()>,
    queue_depth: usize,
) -> (BackgroundQueue, JoinSet<()>) {
    let (tx, rx) = mpsc::channel(queue_depth);
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    let pending = Arc::new(DashSet::new());
    let depth = Arc::new(AtomicUsize::new(0));

    let mut workers = JoinSet::new();
    for id in 0..worker_count.max(1) {
        let transcoder = transcoder.clone();
        let rx = rx.clone();
        let pending = pending.clone();
        let depth = depth.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        workers.spawn(async move {
            info!("background transcode worker {id} started");
            loop {
                let next = {
                    let mut guard = rx.lock().await;
                    tokio::select! {
                        biased;
                        _ = shutdown_rx.recv() => None,
                        key = guard.recv() => key,
                    }
                };
                let Some(key) = next else {
                    break;
                };
                metrics::set_queue_depth(depth.fetch_sub(1, Ordering::SeqCst) - 1);

                let mut worker_shutdown_rx = shutdown_tx.subscribe();
                let outcome = transcoder.try_transcode(&key, &mut worker_shutdown_rx).await;
                pending.remove(&key);
                metrics::set_queue_pending_keys(pending.len());

                // Outcome metrics are recorded inside `try_transcode` itself,
                // so both this worker loop and the synchronous request path
                // contribute to the same counters.
                match outcome {
                    Ok(TranscodeOutcome::Published(_)) | Ok(TranscodeOutcome::NotFound) => {}
                    Ok(TranscodeOutcome::Failed(msg)) => {
                        debug!("background transcode of {key} failed: {msg}");
                    }
                    Err(e) => {
                        warn!("background transcode of {key} errored: {e}");
                    }
                }
            }
            info!("background transcode worker {id} stopped");
        });
    }

    (BackgroundQueue { tx, pending, depth }, workers)
}

/// Waits for every worker in `workers` to exit, up to `WORKER_JOIN_TIMEOUT`
/// each, logging and abandoning any that don't.
pub async fn stop(mut workers: JoinSet<()>) {
    while let Ok(joined) = tokio::time::timeout(WORKER_JOIN_TIMEOUT, workers.join_next()).await {
        match joined {
            Some(Ok(())) => {}
            Some(Err(e)) => warn!("background worker task panicked: {e}"),
            None => break,
        }
    }
    if !workers.is_empty() {
        warn!(
            "{} background worker(s) did not stop within {:?}, abandoning",
            workers.len(),
            WORKER_JOIN_TIMEOUT
        );
    }
}
