// src/core/metrics.rs

//! Defines and registers Prometheus metrics for server monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifetime.

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Gauge, Histogram, TextEncoder, register_counter_vec, register_gauge,
    register_histogram,
};

lazy_static! {
    /// Total HTTP requests to the artifact endpoint, labeled by outcome
    /// status: `hit`, `miss_sync`, `miss_async`, `negative`, `not_modified`,
    /// `version_rejected`.
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "symcache_requests_total",
        "Total number of artifact requests, labeled by outcome status.",
        &["status"]
    )
    .unwrap();

    /// Total transcode attempts, labeled by outcome: `published`,
    /// `not_found`, `failed`, `error`.
    pub static ref TRANSCODES_TOTAL: CounterVec = register_counter_vec!(
        "symcache_transcodes_total",
        "Total number of transcode attempts, labeled by outcome.",
        &["outcome"]
    )
    .unwrap();

    /// Wall-clock duration of a single transcode attempt, in seconds.
    pub static ref TRANSCODE_DURATION_SECONDS: Histogram = register_histogram!(
        "symcache_transcode_duration_seconds",
        "Duration of a single transcode attempt in seconds."
    )
    .unwrap();

    /// Current number of keys pending in the background transcode queue,
    /// including ones already claimed by a worker.
    pub static ref QUEUE_PENDING_KEYS: Gauge = register_gauge!(
        "symcache_queue_pending_keys",
        "Number of distinct artifact keys currently pending background transcoding."
    )
    .unwrap();

    /// Current number of jobs sitting in the channel, not yet claimed by a worker.
    pub static ref QUEUE_DEPTH: Gauge = register_gauge!(
        "symcache_queue_depth",
        "Number of background transcode jobs queued but not yet claimed by a worker."
    )
    .unwrap();
}

/// Increments `symcache_requests_total{status}`.
pub fn record_request(status: &str) {
    REQUESTS_TOTAL.with_label_values(&[status]).inc();
}

/// Increments `symcache_transcodes_total{outcome}`.
pub fn record_transcode(outcome: &str) {
    TRANSCODES_TOTAL.with_label_values(&[outcome]).inc();
}

/// Records a transcode's duration into `symcache_transcode_duration_seconds`.
pub fn observe_transcode_duration(seconds: f64) {
    TRANSCODE_DURATION_SECONDS.observe(seconds);
}

/// Sets `symcache_queue_pending_keys` to `count`.
pub fn set_queue_pending_keys(count: usize) {
    QUEUE_PENDING_KEYS.set(count as f64);
}

/// Sets `symcache_queue_depth` to `count`.
pub fn set_queue_depth(count: usize) {
    QUEUE_DEPTH.set(count as f64);
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}
