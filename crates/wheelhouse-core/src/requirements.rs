//! Line-preserving model of a requirements manifest.
//!
//! The pinner rewrites version constraints in place, so everything it does
//! not touch must survive byte-for-byte: comments, blank lines, installer
//! options, environment markers. The file is held as a list of lines and
//! only constraint lines for pinned packages are ever modified.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use wheelhouse_schema::PackageName;

/// Errors from loading or saving a requirements manifest.
#[derive(Error, Debug)]
pub enum RequirementsError {
    /// The manifest file does not exist. Fatal: pinning without a manifest
    /// has nothing to mutate.
    #[error("requirements manifest not found: {0}")]
    NotFound(PathBuf),

    /// Underlying filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What `pin` did for a single package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinAction {
    /// No prior constraint existed; the pin was inserted at the top.
    Inserted,
    /// A prior constraint was commented out and replaced by the pin.
    Replaced,
    /// The active constraint already equals the requested pin.
    AlreadyPinned,
}

#[derive(Debug, Clone)]
enum ReqLine {
    /// Comment, blank line, installer option, or anything else we pass
    /// through untouched.
    Verbatim(String),
    /// An active constraint line for a named package.
    Constraint { name: PackageName, raw: String },
}

impl ReqLine {
    fn parse(line: &str) -> Self {
        match constraint_name(line) {
            Some(name) => Self::Constraint {
                name,
                raw: line.to_string(),
            },
            None => Self::Verbatim(line.to_string()),
        }
    }

    fn raw(&self) -> &str {
        match self {
            Self::Verbatim(raw) | Self::Constraint { raw, .. } => raw,
        }
    }
}

/// Extract the package name from an active constraint line, if it is one.
///
/// Comments, blanks, and installer options (`-r`, `--extra-index-url`, ...)
/// yield `None`. The name ends at the first character outside the packaging
/// name grammar, so extras (`name[extra]`), operators, and markers all
/// terminate it.
fn constraint_name(line: &str) -> Option<PackageName> {
    let trimmed = line.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('-') {
        return None;
    }
    let end = trimmed
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        .unwrap_or(trimmed.len());
    if end == 0 {
        return None;
    }
    Some(PackageName::new(&trimmed[..end]))
}

/// A requirements manifest, parsed line by line.
#[derive(Debug, Clone)]
pub struct Requirements {
    lines: Vec<ReqLine>,
    trailing_newline: bool,
}

impl Requirements {
    /// Parse manifest content.
    pub fn parse(content: &str) -> Self {
        Self {
            lines: content.lines().map(ReqLine::parse).collect(),
            trailing_newline: content.is_empty() || content.ends_with('\n'),
        }
    }

    /// Load a manifest from disk.
    ///
    /// # Errors
    ///
    /// [`RequirementsError::NotFound`] if the file is missing, otherwise an
    /// I/O error.
    pub fn load(path: &Path) -> Result<Self, RequirementsError> {
        if !path.exists() {
            return Err(RequirementsError::NotFound(path.to_path_buf()));
        }
        Ok(Self::parse(&fs::read_to_string(path)?))
    }

    /// Write the manifest back to disk.
    ///
    /// # Errors
    ///
    /// I/O errors from the write.
    pub fn save(&self, path: &Path) -> Result<(), RequirementsError> {
        fs::write(path, self.render())?;
        Ok(())
    }

    /// Render the manifest. Untouched lines come back byte-for-byte.
    pub fn render(&self) -> String {
        let mut out = self
            .lines
            .iter()
            .map(ReqLine::raw)
            .collect::<Vec<_>>()
            .join("\n");
        if self.trailing_newline && !out.is_empty() {
            out.push('\n');
        }
        out
    }

    /// The raw text of the active constraint for `name`, if any.
    pub fn active_constraint(&self, name: &PackageName) -> Option<&str> {
        self.lines.iter().find_map(|line| match line {
            ReqLine::Constraint { name: n, raw } if n == name => Some(raw.as_str()),
            _ => None,
        })
    }

    /// Pin `name` to exactly `version`.
    ///
    /// Any prior active constraint for the same normalized name is commented
    /// out and an exact-pin line is inserted at the top of the file. If the
    /// active constraint is already the requested pin, nothing changes, so
    /// pinning is idempotent.
    pub fn pin(&mut self, name: &PackageName, version: &str) -> PinAction {
        let pinned = format!("{name}=={version}");

        let mut had_prior = false;
        for line in &mut self.lines {
            let ReqLine::Constraint { name: n, raw } = line else {
                continue;
            };
            if n != name {
                continue;
            }
            if raw.trim() == pinned {
                return PinAction::AlreadyPinned;
            }
            let commented = format!("# {raw}");
            *line = ReqLine::Verbatim(commented);
            had_prior = true;
        }

        self.lines.insert(
            0,
            ReqLine::Constraint {
                name: name.clone(),
                raw: pinned,
            },
        );

        if had_prior {
            PinAction::Replaced
        } else {
            PinAction::Inserted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pins_replace_loose_constraint() {
        let mut reqs = Requirements::parse("torch>=2.5.0\nnumpy\n");
        let name = PackageName::new("torch");
        let action = reqs.pin(&name, "2.9.0a0+git1c57644");

        assert_eq!(action, PinAction::Replaced);
        assert_eq!(
            reqs.render(),
            "torch==2.9.0a0+git1c57644\n# torch>=2.5.0\nnumpy\n"
        );
        assert_eq!(
            reqs.active_constraint(&name),
            Some("torch==2.9.0a0+git1c57644")
        );
    }

    #[test]
    fn pins_insert_when_absent() {
        let mut reqs = Requirements::parse("numpy\n");
        let action = reqs.pin(&PackageName::new("amdsmi"), "6.4.1");
        assert_eq!(action, PinAction::Inserted);
        assert_eq!(reqs.render(), "amdsmi==6.4.1\nnumpy\n");
    }

    #[test]
    fn pinning_is_idempotent() {
        let mut reqs = Requirements::parse("torch>=2.5.0\n# a comment\n\nnumpy\n");
        let name = PackageName::new("torch");
        reqs.pin(&name, "2.9.0");
        let once = reqs.render();

        let mut again = Requirements::parse(&once);
        assert_eq!(again.pin(&name, "2.9.0"), PinAction::AlreadyPinned);
        assert_eq!(again.render(), once);
    }

    #[test]
    fn comments_blanks_and_options_survive_verbatim() {
        let content = "# build deps\n\n-r common.txt\ntorch>=2.5.0\nray[default]==2.9\n";
        let mut reqs = Requirements::parse(content);
        reqs.pin(&PackageName::new("torch"), "2.9.0");
        assert_eq!(
            reqs.render(),
            "torch==2.9.0\n# build deps\n\n-r common.txt\n# torch>=2.5.0\nray[default]==2.9\n"
        );
    }

    #[test]
    fn matches_constraints_by_normalized_name() {
        let mut reqs = Requirements::parse("flash_attn>=2.0\n");
        let name = PackageName::new("flash-attn");
        assert_eq!(reqs.pin(&name, "2.6.0"), PinAction::Replaced);
        assert_eq!(reqs.render(), "flash-attn==2.6.0\n# flash_attn>=2.0\n");
    }

    #[test]
    fn preserves_missing_trailing_newline() {
        let reqs = Requirements::parse("numpy");
        assert_eq!(reqs.render(), "numpy");
    }

    #[test]
    fn load_missing_manifest_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = Requirements::load(&dir.path().join("requirements.txt")).unwrap_err();
        assert!(matches!(err, RequirementsError::NotFound(_)));
    }

    #[test]
    fn roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requirements-rocm.txt");
        fs::write(&path, "torch>=2.5.0\n").unwrap();

        let mut reqs = Requirements::load(&path).unwrap();
        reqs.pin(&PackageName::new("torch"), "2.9.0");
        reqs.save(&path).unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "torch==2.9.0\n# torch>=2.5.0\n"
        );
    }
}
