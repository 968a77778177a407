// src/core/key.rs

//! The `ArtifactKey` identifying a single requested symbol artifact.

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::core::version::SemanticVersion;

/// Identifies a single symbol artifact: the format version a client wants,
/// the artifact's filename, its 128-bit identifier, and its age.
///
/// Equality compares all four components. Hashing uses only `artifact_id`:
/// collisions on a 128-bit id are negligible in practice, while the other
/// fields are highly redundant across the common case of repeated requests
/// for the same binary at different ages.
#[derive(Debug, Clone)]
pub struct ArtifactKey {
    pub format_version: SemanticVersion,
    pub artifact_name: String,
    pub artifact_id: u128,
    pub artifact_age: u32,
}

impl ArtifactKey {
    pub fn new(
        format_version: SemanticVersion,
        artifact_name: impl Into<String>,
        artifact_id: u128,
        artifact_age: u32,
    ) -> Self {
        Self {
            format_version,
            artifact_name: artifact_name.into(),
            artifact_id,
            artifact_age,
        }
    }

    /// The 32-digit uppercase hex rendering of `artifact_id`.
    pub fn id_hex(&self) -> String {
        format!("{:032X}", self.artifact_id)
    }

    /// The uppercase hex rendering of `artifact_age`, unpadded.
    pub fn age_hex(&self) -> String {
        format!("{:X}", self.artifact_age)
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}{}@v{}",
            self.artifact_name,
            self.id_hex(),
            self.age_hex(),
            self.format_version
        )
    }
}

impl PartialEq for ArtifactKey {
    fn eq(&self, other: &Self) -> bool {
        self.format_version == other.format_version
            && self.artifact_name == other.artifact_name
            && self.artifact_id == other.artifact_id
            && self.artifact_age == other.artifact_age
    }
}

impl Eq for ArtifactKey {}

impl Hash for ArtifactKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.artifact_id.hash(state);
    }
}
