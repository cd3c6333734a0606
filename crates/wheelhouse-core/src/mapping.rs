//! Hand-maintained mapping from archive-filename prefixes to requirements
//! package names.
//!
//! Archive filenames spell names with underscores while requirements files
//! use dashes, and no packaging ecosystem guarantees the two agree. The
//! mapping is an explicit, reviewable table rather than a heuristic: adding
//! a package to the custom-build set means adding a row here (or in an
//! override file).

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Built-in mapping for the custom-built dependency stack.
///
/// Keys are filename prefixes including the trailing separator; values are
/// the package names as they appear in requirements manifests.
const DEFAULT_MAPPING: &[(&str, &str)] = &[
    ("vllm-", "vllm"),
    ("torch-", "torch"),
    ("torchvision-", "torchvision"),
    ("torchaudio-", "torchaudio"),
    ("triton-", "triton"),
    ("triton_kernels-", "triton-kernels"),
    ("flash_attn-", "flash-attn"),
    ("aiter-", "aiter"),
    ("amdsmi-", "amdsmi"),
    ("apex-", "apex"),
];

/// Errors from loading a mapping override file.
#[derive(Error, Debug)]
pub enum MappingError {
    /// Underlying filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The override file is not valid TOML.
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Deserialize)]
struct MappingFile {
    /// `[packages]` table: filename prefix -> requirements name.
    packages: BTreeMap<String, String>,
}

/// The prefix -> requirements-name table.
#[derive(Debug, Clone)]
pub struct Mapping {
    /// Entries sorted longest-prefix-first so the first match wins.
    entries: Vec<(String, String)>,
}

impl Default for Mapping {
    fn default() -> Self {
        Self::from_entries(
            DEFAULT_MAPPING
                .iter()
                .map(|&(prefix, name)| (prefix.to_string(), name.to_string())),
        )
    }
}

impl Mapping {
    fn from_entries(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut entries: Vec<_> = entries.into_iter().collect();
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        Self { entries }
    }

    /// Load a mapping from a TOML override file.
    ///
    /// The file replaces the built-in table entirely:
    ///
    /// ```toml
    /// [packages]
    /// "flash_attn-" = "flash-attn"
    /// "torch-" = "torch"
    /// ```
    ///
    /// # Errors
    ///
    /// I/O or TOML parse failures.
    pub fn from_toml_file(path: &Path) -> Result<Self, MappingError> {
        let content = std::fs::read_to_string(path)?;
        let file: MappingFile = toml::from_str(&content)?;
        Ok(Self::from_entries(file.packages))
    }

    /// Match the longest prefix against `filename`.
    ///
    /// Returns `(prefix, requirements_name)` or `None` if no row matches.
    pub fn match_prefix(&self, filename: &str) -> Option<(&str, &str)> {
        self.entries
            .iter()
            .find(|(prefix, _)| filename.starts_with(prefix.as_str()))
            .map(|(prefix, name)| (prefix.as_str(), name.as_str()))
    }

    /// Number of rows in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
