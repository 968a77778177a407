// src/core/symbol_client.rs

//! Client for the upstream symbol server: resolves a `PATH:`-prefixed
//! plaintext response into a local filesystem path for a PDB.

use std::time::Duration;

use tracing::{debug, warn};

use crate::core::errors::GatewayError;
use crate::core::key::ArtifactKey;

const PATH_PREFIX: &str = "PATH:";

/// Talks to the configured symbol server over HTTP, resolving an
/// `ArtifactKey` to the local path of the PDB it names.
#[derive(Debug, Clone)]
pub struct SymbolServerClient {
    base_url: String,
    client: reqwest::Client,
}

impl SymbolServerClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(GatewayError::from)?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    fn resolve_url(&self, key: &ArtifactKey) -> String {
        format!(
            "{}/{}/{}{}/file.ptr",
            self.base_url.trim_end_matches('/'),
            key.artifact_name,
            key.id_hex(),
            key.age_hex()
        )
    }

    /// Resolves `key` to a local PDB path. A timeout, any non-2xx status,
    /// a non-`text/plain` content type, or a body that doesn't parse as a
    /// `PATH:` reply are all treated as definitive absence for this
    /// request, not as a transport error -- the caller's only job on
    /// `Ok(None)` is to write a negative marker, exactly as it does for a
    /// literal 404.
    pub async fn try_get_pdb_path(&self, key: &ArtifactKey) -> Result<Option<String>, GatewayError> {
        let url = self.resolve_url(key);
        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("request to symbol server failed for {key}: {e}");
                return Ok(None);
            }
        };

        if !response.status().is_success() {
            debug!("symbol server returned {} for {key}", response.status());
            return Ok(None);
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.starts_with("text/plain") {
            warn!("symbol server returned unexpected content-type '{content_type}' for {key}");
            return Ok(None);
        }

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                warn!("failed to read symbol server body for {key}: {e}");
                return Ok(None);
            }
        };

        let trimmed = body.trim();
        let Some(path) = trimmed.strip_prefix(PATH_PREFIX) else {
            warn!("symbol server response for {key} did not start with '{PATH_PREFIX}'");
            return Ok(None);
        };

        let path = path.trim();
        if path.is_empty() {
            warn!("symbol server returned an empty path for {key}");
            return Ok(None);
        }

        Ok(Some(path.to_string()))
    }
}
