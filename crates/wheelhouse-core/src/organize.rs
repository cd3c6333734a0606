//! Split collected wheels into size classes for publication channels with
//! different size limits.
//!
//! Static-pages hosting rejects files over 100 MiB, so small wheels go to
//! the pages channel (`packages/`, mirrored from `packages-small/`) and
//! large ones to the release-artifacts channel (`packages-large/`). An
//! empty artifact tree is fatal: publishing an index with zero wheels means
//! the build upstream produced nothing.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;
use walkdir::WalkDir;

/// Default size boundary between the pages and release channels.
pub const SIZE_LIMIT: u64 = 100 * 1024 * 1024;

/// Errors fatal to an organize run.
#[derive(Error, Debug)]
pub enum OrganizeError {
    /// The artifacts directory does not exist.
    #[error("artifacts directory not found: {0}")]
    NotFound(PathBuf),

    /// No wheels anywhere under the artifacts directory.
    #[error("no wheels found under {0}")]
    Empty(PathBuf),

    /// Underlying filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Counts and sizes from an organize run, largest large wheels first.
#[derive(Debug, Clone, Default)]
pub struct OrganizeSummary {
    /// Wheels found under the artifacts tree.
    pub total: usize,
    /// `(filename, bytes)` for wheels at or under the limit.
    pub small: Vec<(String, u64)>,
    /// `(filename, bytes)` for wheels over the limit, sorted descending.
    pub large: Vec<(String, u64)>,
    /// Aggregate size of the small set.
    pub small_bytes: u64,
    /// Aggregate size of the large set.
    pub large_bytes: u64,
    /// Wheels that could not be copied (logged and skipped).
    pub failed: usize,
}

/// Collect wheels recursively from `artifacts_dir` and copy them into the
/// channel layout under `output_root`:
///
/// ```text
/// packages/          small wheels (pages channel)
/// packages-small/    small wheels
/// packages-large/    large wheels (release channel)
/// ```
///
/// Per-file copy failures are logged and skipped; they do not abort the
/// batch.
///
/// # Errors
///
/// [`OrganizeError::NotFound`] for a missing artifacts directory,
/// [`OrganizeError::Empty`] when no wheels exist at all.
pub fn organize(
    artifacts_dir: &Path,
    output_root: &Path,
    size_limit: u64,
) -> Result<OrganizeSummary, OrganizeError> {
    if !artifacts_dir.is_dir() {
        return Err(OrganizeError::NotFound(artifacts_dir.to_path_buf()));
    }

    let packages_dir = output_root.join("packages");
    let small_dir = output_root.join("packages-small");
    let large_dir = output_root.join("packages-large");
    fs::create_dir_all(&packages_dir)?;
    fs::create_dir_all(&small_dir)?;
    fs::create_dir_all(&large_dir)?;

    let wheels: Vec<PathBuf> = WalkDir::new(artifacts_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) if e.file_type().is_file() => Some(e.into_path()),
            Ok(_) => None,
            Err(err) => {
                warn!("skipping unreadable entry: {err}");
                None
            }
        })
        .filter(|path| path.extension().is_some_and(|ext| ext == "whl"))
        .collect();

    if wheels.is_empty() {
        return Err(OrganizeError::Empty(artifacts_dir.to_path_buf()));
    }

    let mut summary = OrganizeSummary {
        total: wheels.len(),
        ..OrganizeSummary::default()
    };

    for wheel in wheels {
        let filename = match wheel.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => continue,
        };
        let copy_result = wheel.metadata().and_then(|meta| {
            let size = meta.len();
            if size > size_limit {
                fs::copy(&wheel, large_dir.join(&filename))?;
            } else {
                fs::copy(&wheel, small_dir.join(&filename))?;
                fs::copy(&wheel, packages_dir.join(&filename))?;
            }
            Ok(size)
        });

        match copy_result {
            Ok(size) if size > size_limit => {
                summary.large.push((filename, size));
                summary.large_bytes += size;
            }
            Ok(size) => {
                summary.small.push((filename, size));
                summary.small_bytes += size;
            }
            Err(err) => {
                warn!("failed to organize {}: {err}", wheel.display());
                summary.failed += 1;
            }
        }
    }

    summary.large.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_sized(dir: &Path, name: &str, size: usize) {
        fs::write(dir.join(name), vec![0u8; size]).unwrap();
    }

    #[test]
    fn routes_wheels_by_size_class() {
        let tmp = tempfile::tempdir().unwrap();
        let artifacts = tmp.path().join("artifacts");
        let nested = artifacts.join("build-gfx942");
        fs::create_dir_all(&nested).unwrap();

        write_sized(&nested, "amdsmi-6.4.1-py3-none-linux_x86_64.whl", 64);
        write_sized(&nested, "torch-2.9.0-cp312-cp312-linux_x86_64.whl", 4096);
        write_sized(&nested, "build.log", 10);

        let out = tmp.path().join("repo");
        // A 1 KiB limit stands in for the real 100 MiB one.
        let summary = organize(&artifacts, &out, 1024).unwrap();

        assert_eq!(summary.total, 2);
        assert_eq!(summary.small.len(), 1);
        assert_eq!(summary.large.len(), 1);
        assert_eq!(summary.large[0].0, "torch-2.9.0-cp312-cp312-linux_x86_64.whl");

        assert!(out.join("packages").join("amdsmi-6.4.1-py3-none-linux_x86_64.whl").exists());
        assert!(out
            .join("packages-small")
            .join("amdsmi-6.4.1-py3-none-linux_x86_64.whl")
            .exists());
        assert!(out
            .join("packages-large")
            .join("torch-2.9.0-cp312-cp312-linux_x86_64.whl")
            .exists());
        // Large wheels never reach the pages channel.
        assert!(!out.join("packages").join("torch-2.9.0-cp312-cp312-linux_x86_64.whl").exists());
    }

    #[test]
    fn boundary_size_counts_as_small() {
        let tmp = tempfile::tempdir().unwrap();
        let artifacts = tmp.path().join("artifacts");
        fs::create_dir_all(&artifacts).unwrap();
        write_sized(&artifacts, "exact-1.0.0-py3-none-any.whl", 1024);

        let summary = organize(&artifacts, &tmp.path().join("repo"), 1024).unwrap();
        assert_eq!(summary.small.len(), 1);
        assert!(summary.large.is_empty());
    }

    #[test]
    fn empty_artifact_tree_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let artifacts = tmp.path().join("artifacts");
        fs::create_dir_all(&artifacts).unwrap();
        write_sized(&artifacts, "not-a-wheel.txt", 10);

        let err = organize(&artifacts, &tmp.path().join("repo"), 1024).unwrap_err();
        assert!(matches!(err, OrganizeError::Empty(_)));
    }

    #[test]
    fn missing_artifacts_dir_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let err = organize(&tmp.path().join("nope"), &tmp.path().join("repo"), 1024).unwrap_err();
        assert!(matches!(err, OrganizeError::NotFound(_)));
    }
}
