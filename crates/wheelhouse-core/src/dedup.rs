//! Duplicate filter: remove externally sourced copies of packages that have
//! a custom-built counterpart.
//!
//! The package list is an explicit allow-list, not derived from the custom
//! directory: only listed names are ever touched, and a listed name with no
//! custom archive is a no-op (fail-open). Packages not yet migrated to
//! custom builds must never block the pipeline.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};
use wheelhouse_schema::{ArchiveName, PackageName};

/// Errors fatal to a filter run.
#[derive(Error, Debug)]
pub enum DedupError {
    /// One of the input directories does not exist.
    #[error("directory not found: {0}")]
    NotFound(PathBuf),

    /// Underlying filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What the filter did for one listed package.
#[derive(Debug, Clone)]
pub struct FilterOutcome {
    /// The listed package name.
    pub package: PackageName,
    /// Archives left in the collected directory.
    pub kept: Vec<String>,
    /// Externally sourced archives that were deleted.
    pub removed: Vec<String>,
    /// Whether a custom-built archive existed for this name.
    pub has_custom: bool,
}

/// Map archive filenames in a directory to their normalized package names.
/// Unparseable filenames are logged and ignored.
fn archives_by_name(dir: &Path) -> Result<BTreeMap<PackageName, BTreeSet<String>>, DedupError> {
    if !dir.is_dir() {
        return Err(DedupError::NotFound(dir.to_path_buf()));
    }

    let mut by_name: BTreeMap<PackageName, BTreeSet<String>> = BTreeMap::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let filename = entry.file_name().to_string_lossy().into_owned();
        match ArchiveName::parse(&filename) {
            Ok(archive) => {
                by_name.entry(archive.name()).or_default().insert(filename);
            }
            Err(err) => {
                warn!("ignoring non-archive file in {}: {err}", dir.display());
            }
        }
    }
    Ok(by_name)
}

/// Remove archives in `all_dir` for each listed package that has a
/// custom-built counterpart in `custom_dir`, keeping only the custom copies.
///
/// `all_dir` is mutated in place. For a listed name with no custom archive
/// nothing is deleted.
///
/// # Errors
///
/// [`DedupError::NotFound`] if either directory is missing, otherwise I/O
/// failures from the deletions.
pub fn filter_duplicates(
    custom_dir: &Path,
    all_dir: &Path,
    packages: &[PackageName],
) -> Result<Vec<FilterOutcome>, DedupError> {
    let custom = archives_by_name(custom_dir)?;
    let all = archives_by_name(all_dir)?;

    let mut outcomes = Vec::with_capacity(packages.len());
    for package in packages {
        let collected = all.get(package).cloned().unwrap_or_default();
        let Some(custom_files) = custom.get(package).filter(|files| !files.is_empty()) else {
            // Fail-open: no custom build for this name, leave everything.
            info!("no custom archive for {package}, leaving {} collected", collected.len());
            outcomes.push(FilterOutcome {
                package: package.clone(),
                kept: collected.into_iter().collect(),
                removed: Vec::new(),
                has_custom: false,
            });
            continue;
        };

        let mut kept = Vec::new();
        let mut removed = Vec::new();
        for filename in collected {
            if custom_files.contains(&filename) {
                kept.push(filename);
            } else {
                fs::remove_file(all_dir.join(&filename))?;
                removed.push(filename);
            }
        }
        outcomes.push(FilterOutcome {
            package: package.clone(),
            kept,
            removed,
            has_custom: true,
        });
    }

    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"wheel bytes").unwrap();
    }

    #[test]
    fn removes_external_copy_keeps_custom() {
        let tmp = tempfile::tempdir().unwrap();
        let custom = tmp.path().join("custom");
        let all = tmp.path().join("all");
        fs::create_dir_all(&custom).unwrap();
        fs::create_dir_all(&all).unwrap();

        touch(&custom, "flash_attn-2.6.0-cp312-cp312-linux_x86_64.whl");
        touch(&all, "flash_attn-2.6.0-cp312-cp312-linux_x86_64.whl");
        touch(&all, "flash_attn-2.5.0-cp312-cp312-linux_x86_64.whl");

        let outcomes =
            filter_duplicates(&custom, &all, &[PackageName::new("flash-attn")]).unwrap();

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].removed, vec![
            "flash_attn-2.5.0-cp312-cp312-linux_x86_64.whl".to_string()
        ]);
        assert!(all.join("flash_attn-2.6.0-cp312-cp312-linux_x86_64.whl").exists());
        assert!(!all.join("flash_attn-2.5.0-cp312-cp312-linux_x86_64.whl").exists());
    }

    #[test]
    fn fail_open_when_no_custom_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let custom = tmp.path().join("custom");
        let all = tmp.path().join("all");
        fs::create_dir_all(&custom).unwrap();
        fs::create_dir_all(&all).unwrap();

        touch(&all, "torch-2.5.0-cp312-cp312-linux_x86_64.whl");

        let outcomes = filter_duplicates(&custom, &all, &[PackageName::new("torch")]).unwrap();
        assert!(!outcomes[0].has_custom);
        assert!(outcomes[0].removed.is_empty());
        assert!(all.join("torch-2.5.0-cp312-cp312-linux_x86_64.whl").exists());
    }

    #[test]
    fn unlisted_packages_are_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let custom = tmp.path().join("custom");
        let all = tmp.path().join("all");
        fs::create_dir_all(&custom).unwrap();
        fs::create_dir_all(&all).unwrap();

        // A custom build exists, but the name is not on the allow-list.
        touch(&custom, "apex-1.4.0-cp312-cp312-linux_x86_64.whl");
        touch(&all, "apex-1.3.0-cp312-cp312-linux_x86_64.whl");

        let outcomes = filter_duplicates(&custom, &all, &[PackageName::new("torch")]).unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(all.join("apex-1.3.0-cp312-cp312-linux_x86_64.whl").exists());
    }

    #[test]
    fn matches_names_across_spellings() {
        let tmp = tempfile::tempdir().unwrap();
        let custom = tmp.path().join("custom");
        let all = tmp.path().join("all");
        fs::create_dir_all(&custom).unwrap();
        fs::create_dir_all(&all).unwrap();

        touch(&custom, "triton_kernels-1.0.0-py3-none-any.whl");
        touch(&all, "triton_kernels-0.9.0-py3-none-any.whl");

        let outcomes =
            filter_duplicates(&custom, &all, &[PackageName::new("triton-kernels")]).unwrap();
        assert_eq!(outcomes[0].removed.len(), 1);
    }

    #[test]
    fn missing_directory_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let err = filter_duplicates(
            &tmp.path().join("custom"),
            &tmp.path().join("all"),
            &[PackageName::new("torch")],
        )
        .unwrap_err();
        assert!(matches!(err, DedupError::NotFound(_)));
    }
}
