//! Object-store publication of wheels and index trees.
//!
//! Remote layout:
//!
//! ```text
//! {bucket}/{namespace}/{commit}/    per-build wheels + index
//! {bucket}/{namespace}/nightly/     mirror, main-branch builds only
//! {bucket}/{namespace}/{version}/   mirror, release builds only
//! ```
//!
//! A destination is all-or-nothing: any failed write aborts the run, so a
//! half-published repository (wheels without index, or the reverse) always
//! surfaces as a failed build rather than a quietly broken index.

use std::path::{Path, PathBuf};

use futures::future::join_all;
use opendal::services::S3;
use opendal::Operator;
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

/// Files uploaded concurrently per batch.
const UPLOAD_PARALLELISM: usize = 8;

/// Errors fatal to a publish run.
#[derive(Error, Debug)]
pub enum UploadError {
    /// A local input tree is missing.
    #[error("upload input not found: {0}")]
    NotFound(PathBuf),

    /// A local file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// The local file.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },

    /// A remote write failed; the run is considered failed as a whole.
    #[error("object store write failed for {key}: {source}")]
    Storage {
        /// The remote key being written.
        key: String,
        /// Underlying store failure.
        source: opendal::Error,
    },
}

/// Object-store connection settings.
///
/// Loaded from the execution environment at the CLI boundary; library code
/// receives the resolved struct.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// S3-compatible endpoint.
    pub endpoint: String,
    /// Access key ID.
    pub access_key: String,
    /// Secret access key.
    pub secret_key: String,
    /// Bucket name.
    pub bucket: String,
    /// Key prefix namespace under the bucket (e.g. `rocm/vllm`).
    pub namespace: String,
}

impl StoreConfig {
    /// Load configuration from `WHEELHOUSE_STORE_*` environment variables.
    ///
    /// Returns `None` if the endpoint or either credential is unset.
    pub fn from_env() -> Option<Self> {
        Some(Self {
            endpoint: std::env::var("WHEELHOUSE_STORE_ENDPOINT").ok()?,
            access_key: std::env::var("WHEELHOUSE_STORE_ACCESS_KEY").ok()?,
            secret_key: std::env::var("WHEELHOUSE_STORE_SECRET_KEY").ok()?,
            bucket: std::env::var("WHEELHOUSE_STORE_BUCKET")
                .unwrap_or_else(|_| "wheelhouse-artifacts".to_string()),
            namespace: std::env::var("WHEELHOUSE_STORE_NAMESPACE")
                .unwrap_or_else(|_| "wheels".to_string()),
        })
    }

    /// Build an S3 operator for this configuration.
    ///
    /// # Errors
    ///
    /// Operator construction failures from the storage layer.
    pub fn operator(&self) -> Result<Operator, opendal::Error> {
        let mut builder = S3::default();
        builder.bucket(&self.bucket);
        builder.endpoint(&self.endpoint);
        builder.access_key_id(&self.access_key);
        builder.secret_access_key(&self.secret_key);
        builder.region("auto");
        Ok(Operator::new(builder)?.finish())
    }
}

/// Branch/release conditions that select mirror destinations.
#[derive(Debug, Clone, Default)]
pub struct ScopeTags {
    /// Branch the build came from.
    pub branch: Option<String>,
    /// Release version string.
    pub version: Option<String>,
    /// Whether this is a release build (not a dev build).
    pub is_release: bool,
}

impl ScopeTags {
    /// Remote prefixes a publish run writes to, commit prefix first.
    pub fn prefixes(&self, namespace: &str, commit: &str) -> Vec<String> {
        let mut prefixes = vec![format!("{namespace}/{commit}")];
        if self.branch.as_deref() == Some("main") {
            prefixes.push(format!("{namespace}/nightly"));
        }
        if self.is_release {
            if let Some(version) = &self.version {
                prefixes.push(format!("{namespace}/{version}"));
            }
        }
        prefixes
    }
}

/// Counts from a publish run.
#[derive(Debug, Clone)]
pub struct PublishSummary {
    /// Files uploaded per destination.
    pub files: usize,
    /// Destinations written.
    pub destinations: Vec<String>,
}

/// Uploader over an object-store operator.
#[derive(Debug)]
pub struct Uploader {
    op: Operator,
    namespace: String,
}

impl Uploader {
    /// Create an uploader writing under `namespace`.
    pub fn new(op: Operator, namespace: impl Into<String>) -> Self {
        Self {
            op,
            namespace: namespace.into(),
        }
    }

    /// Publish a wheel directory and an index tree to the commit prefix and
    /// any mirror prefixes selected by `tags`.
    ///
    /// # Errors
    ///
    /// [`UploadError::NotFound`] for missing inputs; any read or write
    /// failure aborts the run (partial publication is a failure state).
    pub async fn publish(
        &self,
        wheels_dir: &Path,
        index_dir: &Path,
        commit: &str,
        tags: &ScopeTags,
    ) -> Result<PublishSummary, UploadError> {
        let mut files = collect_tree(wheels_dir)?;
        files.extend(collect_tree(index_dir)?);

        let destinations = tags.prefixes(&self.namespace, commit);
        for prefix in &destinations {
            self.upload_all(prefix, &files).await?;
        }

        Ok(PublishSummary {
            files: files.len(),
            destinations,
        })
    }

    async fn upload_all(
        &self,
        prefix: &str,
        files: &[(PathBuf, String)],
    ) -> Result<(), UploadError> {
        for chunk in files.chunks(UPLOAD_PARALLELISM) {
            let futures: Vec<_> = chunk
                .iter()
                .map(|(path, rel)| {
                    let key = format!("{prefix}/{rel}");
                    async move {
                        let data = tokio::fs::read(path).await.map_err(|source| {
                            UploadError::Io {
                                path: path.clone(),
                                source,
                            }
                        })?;
                        debug!("writing {key} ({} bytes)", data.len());
                        self.op
                            .write(&key, data)
                            .await
                            .map_err(|source| UploadError::Storage { key, source })
                    }
                })
                .collect();

            for result in join_all(futures).await {
                result?;
            }
        }
        Ok(())
    }
}

/// Collect every file under `root` with its slash-separated relative path.
fn collect_tree(root: &Path) -> Result<Vec<(PathBuf, String)>, UploadError> {
    if !root.is_dir() {
        return Err(UploadError::NotFound(root.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|err| UploadError::Io {
            path: root.to_path_buf(),
            source: err.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .expect("walkdir yields paths under root")
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push((entry.path().to_path_buf(), rel));
    }
    Ok(files)
}
