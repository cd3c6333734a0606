//! SHA-256 digests and their truncated cache-key form.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Number of hex characters kept when a digest is truncated for cache keys.
pub const SHORT_DIGEST_LEN: usize = 16;

/// A SHA-256 digest as a lowercase hex string (64 characters).
///
/// Used for build-recipe hashing and cache-key derivation. Determinism is
/// the whole point: identical input bytes always produce an identical
/// digest, independent of host or time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sha256Digest(String);

impl Sha256Digest {
    /// Compute the digest of a byte slice.
    pub fn compute(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        Self(hex::encode(digest))
    }

    /// Compute the digest of a file's raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read.
    pub fn compute_file(path: &std::path::Path) -> std::io::Result<Self> {
        let data = std::fs::read(path)?;
        Ok(Self::compute(&data))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Return the first [`SHORT_DIGEST_LEN`] hex characters.
    pub fn short(&self) -> &str {
        &self.0[..SHORT_DIGEST_LEN]
    }
}

impl std::fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Sha256Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
