// src/server/handler.rs

//! The core HTTP protocol: parses the request, applies the version gate and
//! conditional-request rules, and routes to the cache, the background queue,
//! or a synchronous transcode.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::core::cache::CacheLookup;
use crate::core::key::ArtifactKey;
use crate::core::metrics;
use crate::core::transcode::TranscodeOutcome;
use crate::core::version::SemanticVersion;

use super::state::SharedState;

const IF_VERSION_EXCEEDS: &str = "if-version-exceeds";
const ACCEPT_RETRY_AFTER: &str = "accept-retry-after";
const CONTENT_TYPE_SYMCACHE: &str = "application/vnd.ms-symcache";

/// `GET /v{major}.{minor}.{patch}/{name}/{id}/{age}`
pub async fn get_artifact_with_age(
    State(state): State<SharedState>,
    Path((version, name, id, age)): Path<(String, String, String, String)>,
    headers: HeaderMap,
) -> Response {
    handle(state, version, name, id, Some(age), headers).await
}

/// `GET /v{major}.{minor}.{patch}/{name}/{id}` (age defaults to 1).
pub async fn get_artifact(
    State(state): State<SharedState>,
    Path((version, name, id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    handle(state, version, name, id, None, headers).await
}

async fn handle(
    state: SharedState,
    version_segment: String,
    name: String,
    id_segment: String,
    age_segment: Option<String>,
    headers: HeaderMap,
) -> Response {
    debug!("request for v{version_segment}/{name}/{id_segment}/{age_segment:?}");

    let key = match parse_artifact_key(&version_segment, &name, &id_segment, age_segment.as_deref()) {
        Ok(key) => key,
        Err(msg) => {
            metrics::record_request("bad_request");
            return bad_request(msg);
        }
    };

    if key.format_version <= state.config.min_supported_version {
        debug!("{key} rejected: format version at or below minimum supported");
        metrics::record_request("version_rejected");
        return StatusCode::NOT_FOUND.into_response();
    }

    let bound = match parse_if_version_exceeds(&headers, &key.format_version) {
        Ok(bound) => bound,
        Err(msg) => {
            metrics::record_request("bad_request");
            return bad_request(msg);
        }
    };

    let lookup = state.cache.lookup(&key).await;
    let transcoder_version = state.cache.version().clone();

    match lookup {
        CacheLookup::Positive { path, version } => {
            if let Some(bound) = &bound
                && version <= *bound
            {
                metrics::record_request("not_modified");
                return StatusCode::NOT_MODIFIED.into_response();
            }
            metrics::record_request("hit");
            stream_file(&path, &version).await
        }
        CacheLookup::Negative => {
            metrics::record_request("negative");
            StatusCode::NOT_FOUND.into_response()
        }
        CacheLookup::Miss => {
            if let Some(bound) = &bound
                && *bound >= transcoder_version
            {
                metrics::record_request("not_modified");
                return StatusCode::NOT_MODIFIED.into_response();
            }

            let async_eligible = key.format_version > state.config.async_threshold_version
                || accepts_retry_after(&headers);

            if async_eligible {
                state.queue.enqueue(key);
                metrics::record_request("miss_async");
                return (
                    StatusCode::NOT_FOUND,
                    [(header::RETRY_AFTER, state.config.retry_after_seconds.to_string())],
                )
                    .into_response();
            }

            metrics::record_request("miss_sync");
            let mut shutdown_rx = state.shutdown_tx.subscribe();
            match state.transcoder.try_transcode(&key, &mut shutdown_rx).await {
                Ok(TranscodeOutcome::Published(path)) => stream_file(&path, &transcoder_version).await,
                Ok(TranscodeOutcome::NotFound) | Ok(TranscodeOutcome::Failed(_)) => {
                    StatusCode::NOT_FOUND.into_response()
                }
                Err(e) => {
                    warn!("synchronous transcode of {key} errored: {e}");
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
            }
        }
    }
}

async fn stream_file(path: &std::path::Path, version: &SemanticVersion) -> Response {
    let file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(e) => {
            warn!("positive entry at {path:?} vanished before it could be streamed: {e}");
            return StatusCode::NOT_FOUND.into_response();
        }
    };
    let stream = ReaderStream::new(file);
    let content_type = format!("{CONTENT_TYPE_SYMCACHE}; version={version}");
    let mut response = Response::new(Body::from_stream(stream));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type).unwrap_or_else(|_| HeaderValue::from_static(CONTENT_TYPE_SYMCACHE)),
    );
    response
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, message).into_response()
}

fn accepts_retry_after(headers: &HeaderMap) -> bool {
    headers
        .get(ACCEPT_RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// Parses `If-Version-Exceeds`, validating it against the requested version
/// (not the cached/transcoder version -- that comparison happens later).
fn parse_if_version_exceeds(
    headers: &HeaderMap,
    requested: &SemanticVersion,
) -> Result<Option<SemanticVersion>, String> {
    let mut values = headers.get_all(IF_VERSION_EXCEEDS).iter();
    let Some(raw) = values.next() else {
        return Ok(None);
    };
    if values.next().is_some() {
        return Err("at most one If-Version-Exceeds header is allowed".to_string());
    }
    let raw = raw
        .to_str()
        .map_err(|_| "If-Version-Exceeds is not valid UTF-8".to_string())?;
    let bound = SemanticVersion::parse(raw)
        .ok_or_else(|| format!("If-Version-Exceeds '{raw}' is not a valid semantic version"))?;
    if bound.major == 0 {
        return Err("If-Version-Exceeds major version must not be 0".to_string());
    }
    if bound >= *requested {
        return Err("If-Version-Exceeds must be strictly less than the requested version".to_string());
    }
    Ok(Some(bound))
}

/// Parses the four path components into an `ArtifactKey`.
fn parse_artifact_key(
    version_segment: &str,
    name: &str,
    id_segment: &str,
    age_segment: Option<&str>,
) -> Result<ArtifactKey, String> {
    let version_str = version_segment
        .strip_prefix('v')
        .ok_or_else(|| "version path segment must start with 'v'".to_string())?;
    let format_version = SemanticVersion::parse(version_str)
        .ok_or_else(|| format!("'{version_str}' is not a valid semantic version"))?;

    if name.is_empty() || name.contains('/') || name.contains("..") {
        return Err("artifact name must not contain path separators".to_string());
    }

    let cleaned_id: String = id_segment.chars().filter(|c| *c != '-').collect();
    if cleaned_id.len() != 32 || !cleaned_id.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err("artifact id must be a 32-hex-digit identifier".to_string());
    }
    let artifact_id = u128::from_str_radix(&cleaned_id, 16)
        .map_err(|_| "artifact id is not valid hexadecimal".to_string())?;

    let artifact_age: u32 = match age_segment {
        Some(age) => {
            let parsed: u64 = age.parse().map_err(|_| "artifact age is not a valid integer".to_string())?;
            parsed
                .try_into()
                .map_err(|_| "artifact age does not fit in 32 bits".to_string())?
        }
        None => 1,
    };

    Ok(ArtifactKey::new(format_version, name, artifact_id, artifact_age))
}
