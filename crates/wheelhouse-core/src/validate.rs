//! Advisory check that the project wheel's declared dependency pins match
//! the custom-built archives actually being published.
//!
//! A mismatch means the project was built against one version of a
//! dependency while the repository serves another. The check reports and
//! never deletes or fails the run: the duplicate filter already guarantees
//! the custom copy is the one published, so drift here is a packaging smell
//! to investigate, not a reason to discard a finished build.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;
use wheelhouse_schema::{ArchiveName, PackageName};

/// Errors fatal to the check itself (the check being advisory, callers may
/// still choose to log these and continue).
#[derive(Error, Debug)]
pub enum ValidateError {
    /// Wheel or directory missing.
    #[error("not found: {0}")]
    NotFound(PathBuf),

    /// The wheel carries no `*.dist-info/METADATA` member.
    #[error("no dist-info metadata in {0}")]
    MissingMetadata(PathBuf),

    /// The wheel archive could not be read.
    #[error("failed to read wheel archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Underlying filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One declared-vs-built version disagreement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    /// The dependency in question.
    pub package: PackageName,
    /// Version the project wheel declares.
    pub declared: String,
    /// Version of the custom-built archive being published.
    pub built: String,
}

impl std::fmt::Display for Mismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} declared =={} but custom build is {}",
            self.package, self.declared, self.built
        )
    }
}

/// Read the `METADATA` member out of a wheel.
fn read_metadata(wheel: &Path) -> Result<String, ValidateError> {
    if !wheel.is_file() {
        return Err(ValidateError::NotFound(wheel.to_path_buf()));
    }
    let mut archive = zip::ZipArchive::new(File::open(wheel)?)?;
    for i in 0..archive.len() {
        let mut member = archive.by_index(i)?;
        if member.name().contains(".dist-info/") && member.name().ends_with("/METADATA") {
            let mut content = String::new();
            member.read_to_string(&mut content)?;
            return Ok(content);
        }
    }
    Err(ValidateError::MissingMetadata(wheel.to_path_buf()))
}

/// Extract exact pins from `Requires-Dist` headers.
///
/// Only `name==version` requirements participate; ranges and markers carry
/// no single version to compare against. The older parenthesized form
/// (`name (==version)`) is accepted too.
fn exact_pins(metadata: &str) -> BTreeMap<PackageName, String> {
    let mut pins = BTreeMap::new();
    for line in metadata.lines() {
        let Some(value) = line.strip_prefix("Requires-Dist:") else {
            continue;
        };
        let requirement = value.split(';').next().unwrap_or("");
        let cleaned: String = requirement
            .chars()
            .filter(|c| !matches!(c, '(' | ')' | ' '))
            .collect();
        let Some((name, version)) = cleaned.split_once("==") else {
            continue;
        };
        if name.is_empty() || version.is_empty() {
            continue;
        }
        // Strip any extras marker from the name.
        let name = name.split('[').next().unwrap_or(name);
        pins.insert(PackageName::new(name), version.to_string());
    }
    pins
}

/// Versions of the custom-built archives in `custom_dir`, by name.
fn built_versions(custom_dir: &Path) -> Result<BTreeMap<PackageName, String>, ValidateError> {
    if !custom_dir.is_dir() {
        return Err(ValidateError::NotFound(custom_dir.to_path_buf()));
    }
    let mut versions = BTreeMap::new();
    for entry in std::fs::read_dir(custom_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let filename = entry.file_name().to_string_lossy().into_owned();
        match ArchiveName::parse(&filename) {
            Ok(archive) => {
                versions.insert(archive.name(), archive.version().to_string());
            }
            Err(err) => warn!("ignoring non-archive file in {}: {err}", custom_dir.display()),
        }
    }
    Ok(versions)
}

/// Compare the project wheel's declared exact pins against the custom-built
/// archive versions. Returns the disagreements; an empty list means every
/// declared pin that has a custom build agrees with it.
///
/// # Errors
///
/// [`ValidateError`] if the wheel or directory cannot be read; version
/// disagreements are data, not errors.
pub fn check_pinned_deps(
    project_wheel: &Path,
    custom_dir: &Path,
) -> Result<Vec<Mismatch>, ValidateError> {
    let declared = exact_pins(&read_metadata(project_wheel)?);
    let built = built_versions(custom_dir)?;

    let mut mismatches = Vec::new();
    for (package, declared_version) in declared {
        let Some(built_version) = built.get(&package) else {
            continue;
        };
        if *built_version != declared_version {
            mismatches.push(Mismatch {
                package,
                declared: declared_version,
                built: built_version.clone(),
            });
        }
    }
    Ok(mismatches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn write_wheel(path: &Path, metadata: &str) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        writer
            .start_file("vllm-0.6.3.dist-info/METADATA", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(metadata.as_bytes()).unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn extracts_exact_pins_only() {
        let pins = exact_pins(
            "Metadata-Version: 2.1\n\
             Requires-Dist: torch==2.9.0a0+git1c57644\n\
             Requires-Dist: numpy>=1.26\n\
             Requires-Dist: triton (==3.2.0)\n\
             Requires-Dist: ray[default]==2.9.0 ; extra == \"serve\"\n",
        );
        assert_eq!(pins.len(), 3);
        assert_eq!(pins[&PackageName::new("torch")], "2.9.0a0+git1c57644");
        assert_eq!(pins[&PackageName::new("triton")], "3.2.0");
        assert_eq!(pins[&PackageName::new("ray")], "2.9.0");
    }

    #[test]
    fn reports_version_drift() {
        let tmp = tempfile::tempdir().unwrap();
        let custom = tmp.path().join("custom");
        std::fs::create_dir_all(&custom).unwrap();
        std::fs::write(
            custom.join("torch-2.9.1-cp312-cp312-linux_x86_64.whl"),
            b"wheel",
        )
        .unwrap();

        let wheel = tmp.path().join("vllm-0.6.3-cp38-abi3-linux_x86_64.whl");
        write_wheel(&wheel, "Requires-Dist: torch==2.9.0\n");

        let mismatches = check_pinned_deps(&wheel, &custom).unwrap();
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].declared, "2.9.0");
        assert_eq!(mismatches[0].built, "2.9.1");
    }

    #[test]
    fn agreement_and_absent_packages_pass() {
        let tmp = tempfile::tempdir().unwrap();
        let custom = tmp.path().join("custom");
        std::fs::create_dir_all(&custom).unwrap();
        std::fs::write(
            custom.join("torch-2.9.0-cp312-cp312-linux_x86_64.whl"),
            b"wheel",
        )
        .unwrap();

        let wheel = tmp.path().join("vllm-0.6.3-cp38-abi3-linux_x86_64.whl");
        // numpy has no custom build: not compared.
        write_wheel(&wheel, "Requires-Dist: torch==2.9.0\nRequires-Dist: numpy==1.26.4\n");

        assert!(check_pinned_deps(&wheel, &custom).unwrap().is_empty());
    }

    #[test]
    fn wheel_without_metadata_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let wheel = tmp.path().join("broken-1.0-py3-none-any.whl");
        let file = File::create(&wheel).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        writer
            .start_file("broken/__init__.py", SimpleFileOptions::default())
            .unwrap();
        writer.finish().unwrap();

        let custom = tmp.path().join("custom");
        std::fs::create_dir_all(&custom).unwrap();

        let err = check_pinned_deps(&wheel, &custom).unwrap_err();
        assert!(matches!(err, ValidateError::MissingMetadata(_)));
    }
}
