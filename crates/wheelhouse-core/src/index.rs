//! Static index generator for the simple-repository protocol.
//!
//! Emits a three-level tree under the output directory:
//!
//! ```text
//! index.html                      -> links to variant directories
//! {variant}/index.html            -> links to package directories
//! {variant}/{name}/index.html     -> links to archive files
//! ```
//!
//! Output is a pure function of the wheel directory contents and the config:
//! no timestamps, sorted iteration everywhere, so regeneration on unchanged
//! input is byte-identical. Installers key on the anchor tags and the
//! `pypi:repository-version` meta; the heading labels are for humans only.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;
use wheelhouse_schema::{ArchiveName, PackageName};

/// Errors fatal to index generation.
#[derive(Error, Debug)]
pub enum IndexError {
    /// The wheel directory does not exist.
    #[error("wheels directory not found: {0}")]
    NotFound(PathBuf),

    /// Underlying filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration for one generated index tree.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Variant directory name, e.g. `rocm-7.0`.
    pub variant: String,
    /// Absolute base URL for archive hrefs. When unset, hrefs are relative
    /// and resolve against wheels co-located with the index root.
    pub base_url: Option<String>,
    /// Human-readable project version label (page text only).
    pub project_version: Option<String>,
    /// Human-readable GPU architecture label (page text only).
    pub gpu_arch: Option<String>,
}

/// Counts from a generation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSummary {
    /// Distinct normalized package names indexed.
    pub packages: usize,
    /// Archive files linked.
    pub archives: usize,
}

/// Required by the simple-repository protocol on every page.
const REPOSITORY_META: &str = r#"<meta name="pypi:repository-version" content="1.0">"#;

fn page(title: &str, heading: &str, links: &[String]) -> String {
    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html>\n  <head>\n    ");
    html.push_str(REPOSITORY_META);
    html.push_str("\n    <title>");
    html.push_str(title);
    html.push_str("</title>\n  </head>\n  <body>\n    <h1>");
    html.push_str(heading);
    html.push_str("</h1>\n");
    for link in links {
        html.push_str("    ");
        html.push_str(link);
        html.push('\n');
    }
    html.push_str("  </body>\n</html>\n");
    html
}

fn anchor(href: &str, text: &str) -> String {
    format!(r#"<a href="{href}">{text}</a><br>"#)
}

/// Collect archives from a flat wheel directory, grouped by normalized name.
///
/// Filenames are kept exactly as found (link text must be unnormalized);
/// non-archive files are logged and skipped.
fn collect_archives(
    wheels_dir: &Path,
) -> Result<BTreeMap<PackageName, BTreeSet<String>>, IndexError> {
    if !wheels_dir.is_dir() {
        return Err(IndexError::NotFound(wheels_dir.to_path_buf()));
    }

    let mut by_name: BTreeMap<PackageName, BTreeSet<String>> = BTreeMap::new();
    for entry in fs::read_dir(wheels_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let filename = entry.file_name().to_string_lossy().into_owned();
        match ArchiveName::parse(&filename) {
            Ok(archive) => {
                by_name.entry(archive.name()).or_default().insert(filename);
            }
            Err(err) => warn!("not indexing {filename}: {err}"),
        }
    }
    Ok(by_name)
}

/// Generate the index tree for `wheels_dir` under `output_dir`.
///
/// Every package in the wheel directory gets exactly one leaf directory,
/// and every leaf lists exactly that package's archives.
///
/// # Errors
///
/// [`IndexError::NotFound`] for a missing wheel directory, otherwise I/O
/// failures writing the tree.
pub fn generate(
    wheels_dir: &Path,
    output_dir: &Path,
    config: &IndexConfig,
) -> Result<IndexSummary, IndexError> {
    let by_name = collect_archives(wheels_dir)?;

    let variant_dir = output_dir.join(&config.variant);
    fs::create_dir_all(&variant_dir)?;

    // Root page: one link per variant directory, text is the directory name
    // with a trailing slash.
    let root_links = vec![anchor(
        &format!("{}/", config.variant),
        &format!("{}/", config.variant),
    )];
    fs::write(
        output_dir.join("index.html"),
        page("Package index", &heading_label(config), &root_links),
    )?;

    // Variant page: one link per package, sorted by normalized name.
    let package_links: Vec<String> = by_name
        .keys()
        .map(|name| anchor(&format!("{name}/"), name.as_str()))
        .collect();
    fs::write(
        variant_dir.join("index.html"),
        page(&config.variant, &heading_label(config), &package_links),
    )?;

    // Package pages: one link per archive, exact filename as text,
    // percent-encoded href.
    let mut archives = 0usize;
    for (name, files) in &by_name {
        let package_dir = variant_dir.join(name.as_str());
        fs::create_dir_all(&package_dir)?;

        let links: Vec<String> = files
            .iter()
            .map(|filename| {
                let encoded = urlencoding::encode(filename);
                let href = match &config.base_url {
                    Some(base) => format!("{}/{encoded}", base.trim_end_matches('/')),
                    None => format!("../../{encoded}"),
                };
                anchor(&href, filename)
            })
            .collect();
        archives += links.len();

        fs::write(
            package_dir.join("index.html"),
            page(
                &format!("Links for {name}"),
                &format!("Links for {name}"),
                &links,
            ),
        )?;
    }

    Ok(IndexSummary {
        packages: by_name.len(),
        archives,
    })
}

/// Human-readable heading for the root and variant pages. Label metadata
/// never affects the tree structure.
fn heading_label(config: &IndexConfig) -> String {
    let mut label = format!("{} wheels", config.variant);
    if let Some(version) = &config.project_version {
        label.push_str(&format!(" ({version})"));
    }
    if let Some(arch) = &config.gpu_arch {
        label.push_str(&format!(" for {arch}"));
    }
    label
}
