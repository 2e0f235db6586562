//! In-memory build artifacts and content hashing
//!
//! A stage returns its outputs as values, not as filesystem side effects:
//! the artifact carries its payload bytes and a content hash, and the
//! scheduler performs the write-to-disk step separately after the namer has
//! checked for path collisions. This keeps determinism and collision
//! detection testable without touching the filesystem.

use bytes::Bytes;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;

/// Hex chars of the content hash embedded in production file names
const SHORT_HASH_LEN: usize = 8;

/// SHA-256 content hash of an artifact's payload.
///
/// Stable for identical input bytes; this is the determinism anchor for
/// reproducible builds and for the dev server's change detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash the given bytes.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    /// Full hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading hex chars used in hashed file names.
    pub fn short(&self) -> &str {
        &self.0[..SHORT_HASH_LEN]
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.0)
    }
}

/// A single output produced by a stage execution.
///
/// Created fresh on every stage run; the resolved output path is assigned
/// later by the artifact namer.
#[derive(Debug, Clone)]
pub struct OutputArtifact {
    /// Stage-declared logical name, e.g. "app" or a relative static path
    pub logical_name: String,

    /// File extension used by the `{ext}` template placeholder
    pub extension: String,

    /// Name of the stage that produced this artifact
    pub source_stage: String,

    /// Payload bytes, written to disk by the scheduler
    pub payload: Bytes,

    /// Content hash of the payload
    pub hash: ContentHash,
}

impl OutputArtifact {
    pub fn new(
        source_stage: impl Into<String>,
        logical_name: impl Into<String>,
        extension: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        let payload = payload.into();
        let hash = ContentHash::of_bytes(&payload);
        Self {
            logical_name: logical_name.into(),
            extension: extension.into(),
            source_stage: source_stage.into(),
            payload,
            hash,
        }
    }
}

/// An artifact after naming and writing, as recorded in the build report.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactRecord {
    pub logical_name: String,
    pub path: PathBuf,
    pub hash: ContentHash,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        let a = ContentHash::of_bytes(b"hello world");
        let b = ContentHash::of_bytes(b"hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_differs_for_different_bytes() {
        let a = ContentHash::of_bytes(b"hello");
        let b = ContentHash::of_bytes(b"world");
        assert_ne!(a, b);
    }

    #[test]
    fn test_short_hash_length() {
        let hash = ContentHash::of_bytes(b"payload");
        assert_eq!(hash.short().len(), SHORT_HASH_LEN);
        assert!(hash.as_str().starts_with(hash.short()));
        assert_eq!(hash.as_str().len(), 64);
    }

    #[test]
    fn test_display_carries_algorithm() {
        let hash = ContentHash::of_bytes(b"x");
        assert!(format!("{}", hash).starts_with("sha256:"));
    }

    #[test]
    fn test_artifact_hashes_payload() {
        let artifact = OutputArtifact::new("bundle-script", "app", "js", &b"console.log(1)"[..]);
        assert_eq!(artifact.hash, ContentHash::of_bytes(b"console.log(1)"));
        assert_eq!(artifact.logical_name, "app");
        assert_eq!(artifact.extension, "js");
        assert_eq!(artifact.source_stage, "bundle-script");
    }
}
