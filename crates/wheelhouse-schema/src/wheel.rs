//! Archive filename grammar: wheels and source distributions.

use crate::name::PackageName;
use thiserror::Error;

/// Errors raised while decomposing an archive filename.
///
/// These are recoverable by design: build trees mix wheels with artifacts
/// that follow no packaging grammar (container-image tarballs, logs), and
/// callers are expected to skip-and-log rather than abort the batch.
#[derive(Error, Debug)]
pub enum WheelParseError {
    /// The filename does not end in a recognized archive extension.
    #[error("not a package archive: {0}")]
    UnknownExtension(String),

    /// A wheel stem did not split into the expected 5 or 6 dash fields.
    #[error("wheel filename has {count} fields, expected 5 or 6: {filename}")]
    FieldCount {
        /// The offending filename.
        filename: String,
        /// Number of dash-separated fields found.
        count: usize,
    },

    /// The field in version position does not start with a digit.
    #[error("no version field in {0}")]
    BadVersion(String),
}

/// A parsed binary-distribution filename.
///
/// Grammar: `{distribution}-{version}(-{build})?-{python}-{abi}-{platform}.whl`.
/// The distribution field keeps its raw spelling (underscores intact); use
/// [`WheelFilename::name`] for comparisons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WheelFilename {
    /// Distribution name exactly as spelled in the filename.
    pub distribution: String,
    /// Version string (may carry local-version suffixes like `+git1c57644`).
    pub version: String,
    /// Optional build tag (must start with a digit).
    pub build_tag: Option<String>,
    /// Python implementation tag (e.g. `cp312`).
    pub python_tag: String,
    /// ABI tag (e.g. `cp312`, `abi3`, `none`).
    pub abi_tag: String,
    /// Platform tag (e.g. `manylinux_2_28_x86_64`).
    pub platform_tag: String,
}

impl WheelFilename {
    /// Parse a `.whl` filename.
    ///
    /// # Errors
    ///
    /// Returns [`WheelParseError`] if the extension is not `.whl`, the stem
    /// does not split into 5 or 6 dash fields, or the version field does not
    /// start with a digit.
    pub fn parse(filename: &str) -> Result<Self, WheelParseError> {
        let stem = filename
            .strip_suffix(".whl")
            .ok_or_else(|| WheelParseError::UnknownExtension(filename.to_string()))?;

        let fields: Vec<&str> = stem.split('-').collect();
        let (distribution, version, build_tag, tags) = match fields.len() {
            5 => (fields[0], fields[1], None, &fields[2..5]),
            6 => (fields[0], fields[1], Some(fields[2]), &fields[3..6]),
            count => {
                return Err(WheelParseError::FieldCount {
                    filename: filename.to_string(),
                    count,
                });
            }
        };

        if !version.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(WheelParseError::BadVersion(filename.to_string()));
        }

        Ok(Self {
            distribution: distribution.to_string(),
            version: version.to_string(),
            build_tag: build_tag.map(ToString::to_string),
            python_tag: tags[0].to_string(),
            abi_tag: tags[1].to_string(),
            platform_tag: tags[2].to_string(),
        })
    }

    /// Normalized package name for this wheel.
    pub fn name(&self) -> PackageName {
        PackageName::new(&self.distribution)
    }
}

/// Any archive filename the pipeline understands: a wheel or an sdist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveName {
    /// A binary distribution (`.whl`).
    Wheel(WheelFilename),
    /// A source distribution (`.tar.gz`).
    Sdist {
        /// Distribution name exactly as spelled in the filename.
        distribution: String,
        /// Version string.
        version: String,
    },
}

impl ArchiveName {
    /// Parse a wheel or sdist filename.
    ///
    /// Sdists split on the last dash whose following field starts with a
    /// digit, since sdist names may legitimately contain dashes.
    ///
    /// # Errors
    ///
    /// Returns [`WheelParseError`] for unrecognized extensions or filenames
    /// that do not fit either grammar.
    pub fn parse(filename: &str) -> Result<Self, WheelParseError> {
        if filename.ends_with(".whl") {
            return Ok(Self::Wheel(WheelFilename::parse(filename)?));
        }

        let Some(stem) = filename.strip_suffix(".tar.gz") else {
            return Err(WheelParseError::UnknownExtension(filename.to_string()));
        };

        let (distribution, version) = stem
            .rsplit_once('-')
            .filter(|(_, v)| v.starts_with(|c: char| c.is_ascii_digit()))
            .ok_or_else(|| WheelParseError::BadVersion(filename.to_string()))?;

        Ok(Self::Sdist {
            distribution: distribution.to_string(),
            version: version.to_string(),
        })
    }

    /// Normalized package name for this archive.
    pub fn name(&self) -> PackageName {
        match self {
            Self::Wheel(w) => w.name(),
            Self::Sdist { distribution, .. } => PackageName::new(distribution),
        }
    }

    /// Version string for this archive.
    pub fn version(&self) -> &str {
        match self {
            Self::Wheel(w) => &w.version,
            Self::Sdist { version, .. } => version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_five_field_wheel() {
        let w = WheelFilename::parse("torch-2.9.0a0+git1c57644-cp312-cp312-linux_x86_64.whl")
            .unwrap();
        assert_eq!(w.distribution, "torch");
        assert_eq!(w.version, "2.9.0a0+git1c57644");
        assert_eq!(w.build_tag, None);
        assert_eq!(w.platform_tag, "linux_x86_64");
    }

    #[test]
    fn parses_six_field_wheel() {
        let w = WheelFilename::parse("vllm-0.6.3-1-cp38-abi3-manylinux_2_28_x86_64.whl").unwrap();
        assert_eq!(w.version, "0.6.3");
        assert_eq!(w.build_tag.as_deref(), Some("1"));
        assert_eq!(w.python_tag, "cp38");
    }

    #[test]
    fn name_is_normalized() {
        let w = WheelFilename::parse("flash_attn-2.6.0-cp312-cp312-linux_x86_64.whl").unwrap();
        assert_eq!(w.name().as_str(), "flash-attn");
    }

    #[test]
    fn rejects_wrong_field_count() {
        let err = WheelFilename::parse("rocm-base-image.whl").unwrap_err();
        assert!(matches!(err, WheelParseError::FieldCount { count: 3, .. }));
    }

    #[test]
    fn rejects_missing_version() {
        let err =
            WheelFilename::parse("torch-nightly-cp312-cp312-linux_x86_64.whl").unwrap_err();
        assert!(matches!(err, WheelParseError::BadVersion(_)));
    }

    #[test]
    fn parses_sdist_with_dashed_name() {
        let a = ArchiveName::parse("triton-kernels-1.0.0.tar.gz").unwrap();
        assert_eq!(a.name().as_str(), "triton-kernels");
        assert_eq!(a.version(), "1.0.0");
    }

    #[test]
    fn rejects_container_image_tarball() {
        // A docker save tarball has no version field at all.
        assert!(ArchiveName::parse("rocm-base.tar").is_err());
    }
}
