// src/config.rs

//! Manages server configuration: loading, resolving dynamic values, and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::core::version::SemanticVersion;

/// A simple wrapper to allow cloning the config while it's behind a mutex for the `from_file` helper.
pub trait IntoMutex: Sized {
    fn into_mutex(self) -> Arc<Mutex<Self>>;
}

impl IntoMutex for Config {
    fn into_mutex(self) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(self))
    }
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,
    /// The port for the Prometheus metrics server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    8878
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

/// A raw representation of the config file before validation and resolution.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_bind_host")]
    bind_host: String,
    #[serde(default = "default_bind_port")]
    bind_port: u16,
    #[serde(default = "default_log_level")]
    log_level: String,
    symbol_server: String,
    symcache_directory: PathBuf,
    transcoder_path: PathBuf,
    transcoder_version: String,
    #[serde(default = "default_min_supported_version")]
    min_supported_version: String,
    #[serde(default = "default_async_threshold_version")]
    async_threshold_version: String,
    #[serde(default = "default_negative_cache_ttl_seconds")]
    negative_cache_ttl_seconds: u64,
    #[serde(default = "default_symbol_server_timeout_seconds")]
    symbol_server_timeout_seconds: u64,
    #[serde(default = "default_retry_after_seconds")]
    retry_after_seconds: u64,
    #[serde(default = "default_process_output_truncate_chars")]
    process_output_truncate_chars: usize,
    #[serde(default = "default_worker_count")]
    worker_count: usize,
    #[serde(default = "default_queue_depth")]
    queue_depth: usize,
    #[serde(default)]
    metrics: MetricsConfig,
}

fn default_bind_host() -> String {
    "127.0.0.1".to_string()
}
fn default_bind_port() -> u16 {
    7878
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_min_supported_version() -> String {
    "3.0.0".to_string()
}
fn default_async_threshold_version() -> String {
    "3.1.0".to_string()
}
fn default_negative_cache_ttl_seconds() -> u64 {
    24 * 60 * 60
}
fn default_symbol_server_timeout_seconds() -> u64 {
    30
}
fn default_retry_after_seconds() -> u64 {
    1
}
fn default_process_output_truncate_chars() -> usize {
    1000
}
fn default_worker_count() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}
fn default_queue_depth() -> usize {
    1024
}

/// Represents the final, validated, and resolved server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub bind_host: String,
    pub bind_port: u16,
    pub log_level: String,
    pub symbol_server: String,
    pub symcache_directory: PathBuf,
    pub transcoder_path: PathBuf,
    pub transcoder_version: SemanticVersion,
    pub min_supported_version: SemanticVersion,
    pub async_threshold_version: SemanticVersion,
    pub negative_cache_ttl_seconds: u64,
    pub symbol_server_timeout_seconds: u64,
    pub retry_after_seconds: u64,
    pub process_output_truncate_chars: usize,
    pub worker_count: usize,
    pub queue_depth: usize,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let raw_config: RawConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;

        let transcoder_version = SemanticVersion::parse(&raw_config.transcoder_version)
            .ok_or_else(|| anyhow!("invalid transcoder_version '{}'", raw_config.transcoder_version))?;
        let min_supported_version = SemanticVersion::parse(&raw_config.min_supported_version)
            .ok_or_else(|| anyhow!("invalid min_supported_version '{}'", raw_config.min_supported_version))?;
        let async_threshold_version = SemanticVersion::parse(&raw_config.async_threshold_version)
            .ok_or_else(|| anyhow!("invalid async_threshold_version '{}'", raw_config.async_threshold_version))?;

        let config = Config {
            bind_host: raw_config.bind_host,
            bind_port: raw_config.bind_port,
            log_level: raw_config.log_level,
            symbol_server: raw_config.symbol_server,
            symcache_directory: raw_config.symcache_directory,
            transcoder_path: raw_config.transcoder_path,
            transcoder_version,
            min_supported_version,
            async_threshold_version,
            negative_cache_ttl_seconds: raw_config.negative_cache_ttl_seconds,
            symbol_server_timeout_seconds: raw_config.symbol_server_timeout_seconds,
            retry_after_seconds: raw_config.retry_after_seconds,
            process_output_truncate_chars: raw_config.process_output_truncate_chars,
            worker_count: raw_config.worker_count,
            queue_depth: raw_config.queue_depth,
            metrics: raw_config.metrics,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the resolved configuration to ensure logical consistency, and
    /// that the external resources it names (directories, binaries) exist.
    fn validate(&self) -> Result<()> {
        if self.bind_port == 0 {
            return Err(anyhow!("bind_port cannot be 0"));
        }
        if self.bind_host.trim().is_empty() {
            return Err(anyhow!("bind_host cannot be empty"));
        }
        if self.symbol_server.trim().is_empty() {
            return Err(anyhow!("symbol_server cannot be empty"));
        }
        if self.worker_count == 0 {
            return Err(anyhow!("worker_count cannot be 0"));
        }
        if self.min_supported_version >= self.async_threshold_version {
            return Err(anyhow!(
                "min_supported_version ({}) must be lower than async_threshold_version ({})",
                self.min_supported_version,
                self.async_threshold_version
            ));
        }

        if !self.transcoder_path.exists() {
            return Err(anyhow!(
                "transcoder_path '{}' does not exist",
                self.transcoder_path.display()
            ));
        }

        if self.metrics.enabled {
            if self.metrics.port == 0 {
                return Err(anyhow!("metrics.port cannot be 0"));
            }
            if self.metrics.port == self.bind_port {
                return Err(anyhow!(
                    "metrics.port cannot be the same as the main server port"
                ));
            }
        }

        if self.negative_cache_ttl_seconds == 0 {
            warn!("negative_cache_ttl_seconds is 0: every failed lookup will be retried immediately");
        }

        Ok(())
    }
}
