// src/core/version.rs

//! Semantic version parsing and ordering for artifact format versions.

use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)\.(\d+)\.(\d+)(?:-([0-9A-Za-z-]+))?$").expect("static regex is valid")
});

/// A three-part semantic version identifying an on-disk artifact shape, with
/// an optional prerelease tag.
///
/// Ordering is lexicographic over `(major, minor, patch)`. When those are
/// equal, a version carrying a prerelease tag sorts strictly below one
/// without a tag; two tagged versions compare their tags byte-wise. Equality
/// of two absent tags is equality, not "less than" (see the note on
/// `Ord`/`PartialOrd` below).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticVersion {
    pub major: u16,
    pub minor: u8,
    pub patch: u8,
    pub prerelease: Option<String>,
}

impl SemanticVersion {
    pub fn new(major: u16, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: None,
        }
    }

    pub fn with_prerelease(major: u16, minor: u8, patch: u8, prerelease: impl Into<String>) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: Some(prerelease.into()),
        }
    }

    /// Parses a semantic version from `major.minor.patch[-prerelease]`.
    ///
    /// Returns `None` on any malformed input, including a prerelease tag
    /// that parses as the empty string (never valid; absence is represented
    /// by `None`, not `Some(String::new())`).
    pub fn parse(input: &str) -> Option<Self> {
        let caps = VERSION_RE.captures(input)?;
        let major: u16 = caps.get(1)?.as_str().parse().ok()?;
        let minor: u8 = caps.get(2)?.as_str().parse().ok()?;
        let patch: u8 = caps.get(3)?.as_str().parse().ok()?;
        let prerelease = caps.get(4).map(|m| m.as_str().to_string());
        if let Some(tag) = &prerelease
            && tag.is_empty()
        {
            return None;
        }
        Some(Self {
            major,
            minor,
            patch,
            prerelease,
        })
    }
}

impl fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(tag) = &self.prerelease {
            write!(f, "-{tag}")?;
        }
        Ok(())
    }
}

impl PartialEq for SemanticVersion {
    fn eq(&self, other: &Self) -> bool {
        self.major == other.major
            && self.minor == other.minor
            && self.patch == other.patch
            && self.prerelease == other.prerelease
    }
}

impl Eq for SemanticVersion {}

impl PartialOrd for SemanticVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SemanticVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.prerelease, &other.prerelease) {
                // Corrected from the original implementation's behavior: two
                // absent prerelease tags are equal, not "less than". See
                // DESIGN.md for the Open Question this pins down.
                (None, None) => Ordering::Equal,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => a.as_bytes().cmp(b.as_bytes()),
            })
    }
}
