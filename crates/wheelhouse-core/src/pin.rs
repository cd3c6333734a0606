//! Dependency pinner: discover built versions in an install tree and pin
//! them in a requirements manifest.
//!
//! The install tree mixes wheels with artifacts that follow no packaging
//! grammar (container-image tarballs, build logs), so discovery is
//! skip-and-log: an unmatched or unparseable filename never aborts the run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;
use wheelhouse_schema::PackageName;

use crate::mapping::Mapping;
use crate::requirements::{PinAction, Requirements, RequirementsError};

/// Errors fatal to a pinning run.
#[derive(Error, Debug)]
pub enum PinError {
    /// The install directory to scan does not exist.
    #[error("install directory not found: {0}")]
    InstallDirNotFound(PathBuf),

    /// Manifest load/save failure (missing manifest is fatal).
    #[error(transparent)]
    Requirements(#[from] RequirementsError),
}

/// A version discovered for one mapped package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPin {
    /// Requirements-file package name from the mapping table.
    pub package: PackageName,
    /// Exact version parsed from the archive filename.
    pub version: String,
    /// The archive the version came from.
    pub archive: String,
}

/// Outcome of a pinning run.
#[derive(Debug, Default)]
pub struct PinReport {
    /// Applied pins, sorted by package name.
    pub pins: Vec<(DiscoveredPin, PinAction)>,
    /// Archives that matched no mapping row.
    pub unmatched: usize,
    /// Archives that matched a row but had no parseable version.
    pub skipped: usize,
}

/// Scan `install_dir` recursively and map archives to exact versions.
///
/// One entry per package: if several archives agree on a version (one wheel
/// per interpreter, say) the first is kept; disagreeing versions are logged
/// and the first discovered wins.
///
/// # Errors
///
/// [`PinError::InstallDirNotFound`] if the directory is missing.
pub fn scan_install_dir(
    install_dir: &Path,
    mapping: &Mapping,
) -> Result<(Vec<DiscoveredPin>, usize, usize), PinError> {
    if !install_dir.is_dir() {
        return Err(PinError::InstallDirNotFound(install_dir.to_path_buf()));
    }

    let mut discovered: BTreeMap<PackageName, DiscoveredPin> = BTreeMap::new();
    let mut unmatched = 0usize;
    let mut skipped = 0usize;

    for entry in WalkDir::new(install_dir).into_iter().filter_map(|e| match e {
        Ok(entry) => Some(entry),
        Err(err) => {
            warn!("skipping unreadable entry under {}: {err}", install_dir.display());
            None
        }
    }) {
        if !entry.file_type().is_file() {
            continue;
        }
        let filename = entry.file_name().to_string_lossy().into_owned();

        let Some((prefix, req_name)) = mapping.match_prefix(&filename) else {
            debug!("no mapping row for {filename}");
            unmatched += 1;
            continue;
        };

        let Some(version) = version_after_prefix(&filename, prefix) else {
            warn!("cannot parse a version from {filename}, skipping");
            skipped += 1;
            continue;
        };

        let package = PackageName::new(req_name);
        let pin = DiscoveredPin {
            package: package.clone(),
            version,
            archive: filename,
        };

        if let Some(existing) = discovered.get(&package) {
            if existing.version != pin.version {
                warn!(
                    "conflicting versions for {package}: {} ({}) vs {} ({}), keeping the first",
                    existing.version, existing.archive, pin.version, pin.archive
                );
            }
            continue;
        }
        discovered.insert(package, pin);
    }

    Ok((discovered.into_values().collect(), unmatched, skipped))
}

/// The version is the dash field immediately after the matched prefix, with
/// any archive extension stripped (sdists put the extension right after the
/// version).
fn version_after_prefix(filename: &str, prefix: &str) -> Option<String> {
    let rest = filename.strip_prefix(prefix)?;
    let field = rest.split('-').next()?;
    let version = field
        .strip_suffix(".tar.gz")
        .or_else(|| field.strip_suffix(".whl"))
        .or_else(|| field.strip_suffix(".zip"))
        .unwrap_or(field);
    if version.starts_with(|c: char| c.is_ascii_digit()) {
        Some(version.to_string())
    } else {
        None
    }
}

/// Pin every discovered package in the manifest at `requirements_path`,
/// mutating it in place.
///
/// # Errors
///
/// Fatal errors only: a missing install directory or manifest, or an I/O
/// failure writing the manifest back.
pub fn pin_requirements(
    install_dir: &Path,
    requirements_path: &Path,
    mapping: &Mapping,
) -> Result<PinReport, PinError> {
    let (pins, unmatched, skipped) = scan_install_dir(install_dir, mapping)?;
    let mut reqs = Requirements::load(requirements_path)?;

    let mut report = PinReport {
        unmatched,
        skipped,
        ..PinReport::default()
    };

    // Reverse order so the inserted-at-top block reads in sorted order.
    for pin in pins.into_iter().rev() {
        let action = reqs.pin(&pin.package, &pin.version);
        report.pins.push((pin, action));
    }
    report.pins.reverse();

    reqs.save(requirements_path)?;
    Ok(report)
}
