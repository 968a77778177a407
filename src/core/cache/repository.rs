// src/core/cache/repository.rs

//! Maps `ArtifactKey`s to filesystem paths and implements the three-state
//! cache protocol (positive hit / negative hit / miss) over a local
//! directory shared with other processes.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, warn};

use crate::core::key::ArtifactKey;
use crate::core::version::SemanticVersion;

/// The outcome of a cache lookup.
#[derive(Debug, Clone)]
pub enum CacheLookup {
    /// A positive artifact exists at `path`, published at `version`.
    Positive { path: PathBuf, version: SemanticVersion },
    /// A past transcode attempt definitively failed and the negative TTL has
    /// not yet expired.
    Negative,
    /// Neither a live positive nor an unexpired negative entry exists.
    Miss,
}

/// The on-disk cache repository. Every artifact the gateway has ever
/// produced (or failed to produce) lives under `root`, keyed by
/// `(artifact_name, artifact_id, artifact_age)`.
///
/// The gateway only ever operates one transcoder binary at a time (see
/// spec Non-goals), so every positive entry the repository writes or reads
/// is published at `version` -- the single format version that binary
/// currently emits. A client may *request* a different format version in
/// its URL; that comparison happens in the HTTP handler, not here.
#[derive(Debug, Clone)]
pub struct CacheRepository {
    root: PathBuf,
    version: SemanticVersion,
    negative_ttl: chrono::Duration,
}

impl CacheRepository {
    pub fn new(root: PathBuf, version: SemanticVersion, negative_ttl: std::time::Duration) -> Self {
        Self {
            root,
            version,
            negative_ttl: chrono::Duration::from_std(negative_ttl)
                .unwrap_or_else(|_| chrono::Duration::hours(24)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn version(&self) -> &SemanticVersion {
        &self.version
    }

    /// The directory holding both the positive and negative entries for `key`.
    fn entry_dir(&self, key: &ArtifactKey) -> PathBuf {
        self.root
            .join(&key.artifact_name)
            .join(format!("{}{}", key.id_hex(), key.age_hex()))
    }

    fn file_stem(&self, key: &ArtifactKey) -> String {
        format!("{}-v{}", key.artifact_name, self.version)
    }

    /// The canonical positive-entry path for `key`. Pure function of `key`
    /// and the configured root/version; performs no filesystem access.
    pub fn path_for(&self, key: &ArtifactKey) -> PathBuf {
        self.entry_dir(key)
            .join(format!("{}.symcache", self.file_stem(key)))
    }

    /// The canonical negative-marker path for `key`.
    pub fn negative_path_for(&self, key: &ArtifactKey) -> PathBuf {
        self.entry_dir(key)
            .join(format!("{}.negativesymcache", self.file_stem(key)))
    }

    /// Looks up `key`. Tolerates concurrent deletion and malformed markers:
    /// every I/O failure degrades to `Miss` rather than propagating as an
    /// error.
    pub async fn lookup(&self, key: &ArtifactKey) -> CacheLookup {
        let positive_path = self.path_for(key);
        if tokio::fs::metadata(&positive_path).await.is_ok() {
            return CacheLookup::Positive {
                path: positive_path,
                version: self.version.clone(),
            };
        }

        let negative_path = self.negative_path_for(key);
        let contents = match tokio::fs::read_to_string(&negative_path).await {
            Ok(c) => c,
            Err(_) => return CacheLookup::Miss,
        };

        match DateTime::parse_from_rfc3339(contents.trim()) {
            Ok(expiry) => {
                if Utc::now() < expiry {
                    CacheLookup::Negative
                } else {
                    // Expired: logically absent. Best-effort cleanup; a
                    // concurrent writer or reader may already have removed
                    // or replaced it, so swallow any error.
                    if let Err(e) = tokio::fs::remove_file(&negative_path).await {
                        debug!("failed to unlink expired negative marker: {e}");
                    }
                    CacheLookup::Miss
                }
            }
            Err(e) => {
                warn!("unparseable negative marker at {negative_path:?}: {e}");
                CacheLookup::Miss
            }
        }
    }

    /// Writes (or overwrites) a negative marker for `key`, expiring
    /// `negative_ttl` from now.
    pub async fn mark_negative(&self, key: &ArtifactKey) -> std::io::Result<()> {
        let path = self.negative_path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let expiry = Utc::now() + self.negative_ttl;
        let rendered = expiry.to_rfc3339_opts(SecondsFormat::Nanos, true);
        tokio::fs::write(&path, rendered).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;
    use tempfile::tempdir;

    fn key() -> ArtifactKey {
        ArtifactKey::new(
            SemanticVersion::new(3, 1, 0),
            "ntdll.pdb",
            0xABCDEF0123456789ABCDEF0123456789,
            1,
        )
    }

    fn repo(root: &Path) -> CacheRepository {
        CacheRepository::new(
            root.to_path_buf(),
            SemanticVersion::new(3, 1, 0),
            StdDuration::from_secs(86_400),
        )
    }

    #[test]
    fn path_for_is_pure_and_stable() {
        let dir = tempdir().unwrap();
        let repo = repo(dir.path());
        assert_eq!(repo.path_for(&key()), repo.path_for(&key()));
        assert!(
            repo.path_for(&key())
                .to_string_lossy()
                .ends_with("ntdll.pdb/ABCDEF0123456789ABCDEF01234567891/ntdll.pdb-v3.1.0.symcache")
        );
    }

    #[tokio::test]
    async fn fresh_key_is_a_miss() {
        let dir = tempdir().unwrap();
        let repo = repo(dir.path());
        assert!(matches!(repo.lookup(&key()).await, CacheLookup::Miss));
    }

    #[tokio::test]
    async fn positive_file_is_a_hit() {
        let dir = tempdir().unwrap();
        let repo = repo(dir.path());
        let path = repo.path_for(&key());
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, b"fake symcache bytes").await.unwrap();

        match repo.lookup(&key()).await {
            CacheLookup::Positive { path: p, version } => {
                assert_eq!(p, path);
                assert_eq!(version, SemanticVersion::new(3, 1, 0));
            }
            other => panic!("expected positive hit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn mark_negative_then_lookup_returns_negative_before_ttl() {
        let dir = tempdir().unwrap();
        let repo = repo(dir.path());
        repo.mark_negative(&key()).await.unwrap();
        assert!(matches!(repo.lookup(&key()).await, CacheLookup::Negative));
    }

    #[tokio::test]
    async fn expired_negative_marker_is_a_miss_and_is_deleted() {
        let dir = tempdir().unwrap();
        // TTL of zero so the marker is immediately in the past.
        let repo = CacheRepository::new(
            dir.path().to_path_buf(),
            SemanticVersion::new(3, 1, 0),
            StdDuration::from_secs(0),
        );
        repo.mark_negative(&key()).await.unwrap();
        // Guarantee real wall-clock time has advanced past the expiry.
        tokio::time::sleep(StdDuration::from_millis(5)).await;

        assert!(matches!(repo.lookup(&key()).await, CacheLookup::Miss));
        assert!(!repo.negative_path_for(&key()).exists());
    }

    #[tokio::test]
    async fn unparseable_marker_degrades_to_miss() {
        let dir = tempdir().unwrap();
        let repo = repo(dir.path());
        let path = repo.negative_path_for(&key());
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, b"not a timestamp").await.unwrap();
        assert!(matches!(repo.lookup(&key()).await, CacheLookup::Miss));
    }

    #[tokio::test]
    async fn positive_wins_over_stale_negative() {
        let dir = tempdir().unwrap();
        let repo = repo(dir.path());
        repo.mark_negative(&key()).await.unwrap();
        let path = repo.path_for(&key());
        tokio::fs::write(&path, b"bytes").await.unwrap();

        match repo.lookup(&key()).await {
            CacheLookup::Positive { .. } => {}
            other => panic!("expected positive to win, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn repeated_mark_negative_is_idempotent() {
        let dir = tempdir().unwrap();
        let repo = repo(dir.path());
        repo.mark_negative(&key()).await.unwrap();
        repo.mark_negative(&key()).await.unwrap();
        assert!(matches!(repo.lookup(&key()).await, CacheLookup::Negative));
    }
}
