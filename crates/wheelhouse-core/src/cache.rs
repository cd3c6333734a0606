//! Build cache: content-derived keys and remote snapshot storage.
//!
//! A key is `{recipe_hash}-{args_hash}`, both SHA-256 truncated to 16 hex
//! characters: the recipe hash over the raw bytes of the build-recipe file,
//! the args hash over a canonical serialization of the build argument set.
//! Identical recipe bytes and argument set always derive the same key, on
//! any host at any time; that is the only contract the cache relies on.
//!
//! Snapshots live at `{namespace}/cache/{key}.tar.gz` in the object store.
//! The store is not assumed read-after-write consistent: a check right
//! after an upload may still miss, which is fine because checks only happen
//! on later pipeline runs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use opendal::Operator;
use serde::Serialize;
use thiserror::Error;
use wheelhouse_schema::Sha256Digest;

/// Errors from key derivation and cache transfer.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The build-recipe file could not be read.
    #[error("failed to read recipe {path}: {source}")]
    Recipe {
        /// Path to the recipe file.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },

    /// The build argument set could not be serialized.
    #[error("failed to serialize build args: {0}")]
    Args(#[from] serde_json::Error),

    /// No snapshot exists for the key (normal miss on `check`, fatal on
    /// `download`).
    #[error("no cached build for key {0}")]
    NotFound(String),

    /// Object store failure.
    #[error("object store error: {0}")]
    Storage(#[from] opendal::Error),

    /// Local filesystem failure while packing or unpacking a snapshot.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The build argument set that feeds the args half of the key.
///
/// Serialization is canonical by construction: the pin map is sorted
/// (`BTreeMap`) and the arch list is sorted in `canonical()`, so two
/// argument sets with the same content always serialize identically.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildArgs {
    /// Version pins fed to the build (`torch` -> `2.9.0a0+git1c57644`).
    pub pins: BTreeMap<String, String>,
    /// GPU architectures the build targets (`gfx942`, ...).
    pub archs: Vec<String>,
    /// Interpreter version (`3.12`).
    pub python_version: String,
}

impl BuildArgs {
    /// Canonical JSON serialization of the argument set.
    ///
    /// # Errors
    ///
    /// Serialization failures (not expected for this type).
    pub fn canonical(&self) -> Result<String, CacheError> {
        let mut sorted = self.clone();
        sorted.archs.sort();
        Ok(serde_json::to_string(&sorted)?)
    }
}

/// A derived cache key: `{recipe_hash16}-{args_hash16}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a recipe file and argument set.
    ///
    /// # Errors
    ///
    /// [`CacheError::Recipe`] if the recipe cannot be read.
    pub fn compute(recipe_path: &Path, args: &BuildArgs) -> Result<Self, CacheError> {
        let recipe_hash =
            Sha256Digest::compute_file(recipe_path).map_err(|source| CacheError::Recipe {
                path: recipe_path.to_path_buf(),
                source,
            })?;
        let args_hash = Sha256Digest::compute(args.canonical()?.as_bytes());
        Ok(Self(format!("{}-{}", recipe_hash.short(), args_hash.short())))
    }

    /// Wrap an already-derived key string (e.g. from a CLI argument).
    pub fn from_string(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of a cache probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// A snapshot exists for the key.
    Hit,
    /// No snapshot, or a rebuild was forced.
    Miss,
}

/// Cache behavior flags.
///
/// `force_rebuild` is an explicit field, populated by the caller from its
/// trigger (CI variable, CLI flag); the library never reads the
/// environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheConfig {
    /// Bypass probes and always report a miss.
    pub force_rebuild: bool,
}

/// Remote build cache over an object-store operator.
#[derive(Debug)]
pub struct BuildCache {
    op: Operator,
    namespace: String,
    config: CacheConfig,
}

impl BuildCache {
    /// Create a cache client over `op`, storing snapshots under
    /// `{namespace}/cache/`.
    pub fn new(op: Operator, namespace: impl Into<String>, config: CacheConfig) -> Self {
        Self {
            op,
            namespace: namespace.into(),
            config,
        }
    }

    fn remote_path(&self, key: &CacheKey) -> String {
        format!("{}/cache/{key}.tar.gz", self.namespace)
    }

    /// Probe the store for a snapshot.
    ///
    /// With `force_rebuild` set this reports [`CacheStatus::Miss`] without
    /// touching the store.
    ///
    /// # Errors
    ///
    /// Object-store failures (a clean "not there" is a miss, not an error).
    pub async fn check(&self, key: &CacheKey) -> Result<CacheStatus, CacheError> {
        if self.config.force_rebuild {
            return Ok(CacheStatus::Miss);
        }
        if self.op.is_exist(&self.remote_path(key)).await? {
            Ok(CacheStatus::Hit)
        } else {
            Ok(CacheStatus::Miss)
        }
    }

    /// Download and unpack the snapshot for `key` into `dest`.
    ///
    /// # Errors
    ///
    /// [`CacheError::NotFound`] if the store has no snapshot for the key.
    pub async fn download(&self, key: &CacheKey, dest: &Path) -> Result<(), CacheError> {
        let path = self.remote_path(key);
        if !self.op.is_exist(&path).await? {
            return Err(CacheError::NotFound(key.to_string()));
        }
        let data = self.op.read(&path).await?;

        std::fs::create_dir_all(dest)?;
        let mut archive = tar::Archive::new(GzDecoder::new(data.as_slice()));
        archive.unpack(dest)?;
        Ok(())
    }

    /// Pack `src` into a gzip tar snapshot and upload it for `key`.
    ///
    /// Returns the remote path written.
    ///
    /// # Errors
    ///
    /// Local I/O failures while packing, or object-store failures.
    pub async fn upload(&self, key: &CacheKey, src: &Path) -> Result<String, CacheError> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.append_dir_all(".", src)?;
        let bytes = builder.into_inner()?.finish()?;

        let path = self.remote_path(key);
        self.op.write(&path, bytes).await?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opendal::services::Memory;

    fn args() -> BuildArgs {
        BuildArgs {
            pins: BTreeMap::from([
                ("torch".to_string(), "2.9.0a0+git1c57644".to_string()),
                ("triton".to_string(), "3.2.0".to_string()),
            ]),
            archs: vec!["gfx942".to_string(), "gfx90a".to_string()],
            python_version: "3.12".to_string(),
        }
    }

    fn memory_cache(config: CacheConfig) -> BuildCache {
        let op = Operator::new(Memory::default()).unwrap().finish();
        BuildCache::new(op, "wheels", config)
    }

    #[test]
    fn key_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let recipe = dir.path().join("Dockerfile.rocm");
        std::fs::write(&recipe, b"FROM rocm/dev-ubuntu-22.04\nRUN make\n").unwrap();

        let a = CacheKey::compute(&recipe, &args()).unwrap();
        let b = CacheKey::compute(&recipe, &args()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 33); // 16 + '-' + 16
    }

    #[test]
    fn arch_order_does_not_change_key() {
        let dir = tempfile::tempdir().unwrap();
        let recipe = dir.path().join("Dockerfile.rocm");
        std::fs::write(&recipe, b"FROM base\n").unwrap();

        let mut reordered = args();
        reordered.archs.reverse();
        assert_eq!(
            CacheKey::compute(&recipe, &args()).unwrap(),
            CacheKey::compute(&recipe, &reordered).unwrap()
        );
    }

    #[test]
    fn recipe_byte_change_changes_key() {
        let dir = tempfile::tempdir().unwrap();
        let recipe = dir.path().join("Dockerfile.rocm");

        std::fs::write(&recipe, b"RUN make -j8\n").unwrap();
        let a = CacheKey::compute(&recipe, &args()).unwrap();

        std::fs::write(&recipe, b"RUN make -j9\n").unwrap();
        let b = CacheKey::compute(&recipe, &args()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn pin_change_changes_key() {
        let dir = tempfile::tempdir().unwrap();
        let recipe = dir.path().join("Dockerfile.rocm");
        std::fs::write(&recipe, b"FROM base\n").unwrap();

        let mut bumped = args();
        bumped
            .pins
            .insert("torch".to_string(), "2.9.1".to_string());
        assert_ne!(
            CacheKey::compute(&recipe, &args()).unwrap(),
            CacheKey::compute(&recipe, &bumped).unwrap()
        );
    }

    #[test]
    fn missing_recipe_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = CacheKey::compute(&dir.path().join("nope"), &args()).unwrap_err();
        assert!(matches!(err, CacheError::Recipe { .. }));
    }

    #[tokio::test]
    async fn roundtrip_through_memory_store() {
        let cache = memory_cache(CacheConfig::default());
        let key = CacheKey::from_string("aaaaaaaaaaaaaaaa-bbbbbbbbbbbbbbbb");

        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("install");
        std::fs::create_dir_all(src.join("lib")).unwrap();
        std::fs::write(src.join("lib").join("libamdhip64.so"), b"elf bytes").unwrap();

        assert_eq!(cache.check(&key).await.unwrap(), CacheStatus::Miss);
        cache.upload(&key, &src).await.unwrap();
        assert_eq!(cache.check(&key).await.unwrap(), CacheStatus::Hit);

        let dest = tmp.path().join("restore");
        cache.download(&key, &dest).await.unwrap();
        assert_eq!(
            std::fs::read(dest.join("lib").join("libamdhip64.so")).unwrap(),
            b"elf bytes"
        );
    }

    #[tokio::test]
    async fn force_rebuild_always_misses() {
        let cache = memory_cache(CacheConfig {
            force_rebuild: true,
        });
        let key = CacheKey::from_string("cccccccccccccccc-dddddddddddddddd");

        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("install");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("marker"), b"x").unwrap();
        cache.upload(&key, &src).await.unwrap();

        assert_eq!(cache.check(&key).await.unwrap(), CacheStatus::Miss);
    }

    #[tokio::test]
    async fn download_missing_key_is_not_found() {
        let cache = memory_cache(CacheConfig::default());
        let key = CacheKey::from_string("eeeeeeeeeeeeeeee-ffffffffffffffff");
        let tmp = tempfile::tempdir().unwrap();

        let err = cache.download(&key, tmp.path()).await.unwrap_err();
        assert!(matches!(err, CacheError::NotFound(_)));
    }
}
