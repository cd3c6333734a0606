//! `wheelhouse` - the release-pipeline driver for ROCm wheel packages.
//!
//! Each subcommand is one pipeline stage: derive the build cache key, probe
//! and transfer cached build snapshots, pin requirements to built versions,
//! drop externally sourced duplicates, generate the static package index,
//! split wheels by size class, and publish to the object store.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use wheelhouse_core::cache::{BuildArgs, BuildCache, CacheConfig, CacheKey, CacheStatus};
use wheelhouse_core::index::{self, IndexConfig};
use wheelhouse_core::mapping::Mapping;
use wheelhouse_core::requirements::PinAction;
use wheelhouse_core::store::{ScopeTags, StoreConfig, Uploader};
use wheelhouse_core::{dedup, organize, pin, validate};
use wheelhouse_schema::PackageName;

#[derive(Parser)]
#[command(name = "wheelhouse")]
#[command(about = "Build-and-release pipeline for ROCm wheel packages", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Derive the build cache key for a recipe and argument set
    Key {
        /// Path to the build-recipe file (e.g. Dockerfile.rocm)
        #[arg(long)]
        recipe: PathBuf,
        /// Version pins fed to the build, as name=version
        #[arg(long = "pin", value_parser = parse_pin)]
        pins: Vec<(String, String)>,
        /// Target GPU architectures (order does not affect the key)
        #[arg(long = "arch")]
        archs: Vec<String>,
        /// Interpreter version the stack is built for
        #[arg(long, default_value = "3.12")]
        python: String,
    },
    /// Probe the object store for a cached build snapshot
    CacheCheck {
        /// The cache key to probe
        #[arg(long)]
        key: String,
        /// Report a miss without probing (external rebuild trigger)
        #[arg(long, env = "WHEELHOUSE_FORCE_REBUILD")]
        force_rebuild: bool,
    },
    /// Download and unpack a cached build snapshot
    CachePull {
        /// The cache key to fetch
        #[arg(long)]
        key: String,
        /// Directory to unpack the snapshot into
        #[arg(long)]
        dest: PathBuf,
    },
    /// Pack a build tree and upload it as a cache snapshot
    CachePush {
        /// The cache key to store under
        #[arg(long)]
        key: String,
        /// Build tree to snapshot
        #[arg(long)]
        src: PathBuf,
    },
    /// Pin a requirements manifest to the versions in an install tree
    Pin {
        /// Directory holding the built archives
        #[arg(long)]
        install_dir: PathBuf,
        /// Requirements manifest to rewrite in place
        #[arg(long)]
        requirements: PathBuf,
        /// TOML file overriding the built-in package mapping table
        #[arg(long)]
        mapping: Option<PathBuf>,
    },
    /// Remove externally sourced copies of custom-built packages
    Dedup {
        /// Directory of custom-built archives
        #[arg(long)]
        custom: PathBuf,
        /// Directory of all collected archives (mutated in place)
        #[arg(long)]
        all: PathBuf,
        /// Package names to filter (explicit allow-list)
        #[arg(long = "package", required = true)]
        packages: Vec<String>,
        /// Project wheel whose declared pins are checked against the
        /// retained custom archives (advisory)
        #[arg(long)]
        check_wheel: Option<PathBuf>,
    },
    /// Generate the static package index for a wheel directory
    Index {
        /// Flat directory of wheel archives
        #[arg(long)]
        wheels: PathBuf,
        /// Output directory for the index tree
        #[arg(long)]
        output: PathBuf,
        /// Variant subdirectory name (e.g. rocm-7.0)
        #[arg(long)]
        variant: String,
        /// Absolute base URL for archive links (relative links if unset)
        #[arg(long)]
        base_url: Option<String>,
        /// Project version label shown in page headings
        #[arg(long)]
        project_version: Option<String>,
        /// GPU architecture label shown in page headings
        #[arg(long)]
        gpu_arch: Option<String>,
    },
    /// Split wheels into size classes for the publication channels
    Organize {
        /// Directory tree of build artifacts to scan for wheels
        #[arg(long)]
        artifacts: PathBuf,
        /// Output root for packages/, packages-small/, packages-large/
        #[arg(long)]
        output: PathBuf,
    },
    /// Publish wheels and index to the object store
    Upload {
        /// Directory of wheel archives
        #[arg(long)]
        wheels: PathBuf,
        /// Generated index tree
        #[arg(long)]
        index: PathBuf,
        /// Commit the build came from (names the primary prefix)
        #[arg(long)]
        commit: String,
        /// Branch the build came from (main also publishes to nightly/)
        #[arg(long)]
        branch: Option<String>,
        /// Release version (with --release, also publishes to {version}/)
        #[arg(long)]
        version: Option<String>,
        /// This is a release build, not a dev build
        #[arg(long)]
        release: bool,
        /// Print destinations without writing anything
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
}

fn parse_pin(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(name, version)| (name.to_string(), version.to_string()))
        .ok_or_else(|| format!("expected name=version, got '{s}'"))
}

fn store_config() -> Result<StoreConfig> {
    StoreConfig::from_env().context(
        "object store not configured (set WHEELHOUSE_STORE_ENDPOINT, \
         WHEELHOUSE_STORE_ACCESS_KEY, WHEELHOUSE_STORE_SECRET_KEY)",
    )
}

fn build_cache(force_rebuild: bool) -> Result<BuildCache> {
    let config = store_config()?;
    let op = config.operator().context("failed to build store operator")?;
    Ok(BuildCache::new(op, config.namespace, CacheConfig { force_rebuild }))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Key {
            recipe,
            pins,
            archs,
            python,
        } => {
            let args = BuildArgs {
                pins: pins.into_iter().collect(),
                archs,
                python_version: python,
            };
            let key = CacheKey::compute(&recipe, &args)?;
            println!("{key}");
        }
        Commands::CacheCheck { key, force_rebuild } => {
            let cache = build_cache(force_rebuild)?;
            let key = CacheKey::from_string(key);
            match cache.check(&key).await? {
                CacheStatus::Hit => println!("hit"),
                CacheStatus::Miss => println!("miss"),
            }
        }
        Commands::CachePull { key, dest } => {
            let cache = build_cache(false)?;
            let key = CacheKey::from_string(key);
            cache
                .download(&key, &dest)
                .await
                .with_context(|| format!("cache pull failed for key {key}"))?;
            println!("  restored {key} to {}", dest.display());
        }
        Commands::CachePush { key, src } => {
            let cache = build_cache(false)?;
            let key = CacheKey::from_string(key);
            let path = cache
                .upload(&key, &src)
                .await
                .with_context(|| format!("cache push failed for key {key}"))?;
            println!("  uploaded {path}");
        }
        Commands::Pin {
            install_dir,
            requirements,
            mapping,
        } => {
            let mapping = match mapping {
                Some(path) => Mapping::from_toml_file(&path)
                    .with_context(|| format!("failed to load mapping {}", path.display()))?,
                None => Mapping::default(),
            };

            let report = pin::pin_requirements(&install_dir, &requirements, &mapping)?;
            for (discovered, action) in &report.pins {
                let verb = match action {
                    PinAction::Inserted => "pinned",
                    PinAction::Replaced => "repinned",
                    PinAction::AlreadyPinned => "unchanged",
                };
                println!(
                    "  {verb} {}=={} (from {})",
                    discovered.package, discovered.version, discovered.archive
                );
            }
            println!(
                "  {} pinned, {} unmatched, {} skipped",
                report.pins.len(),
                report.unmatched,
                report.skipped
            );
        }
        Commands::Dedup {
            custom,
            all,
            packages,
            check_wheel,
        } => {
            let names: Vec<PackageName> =
                packages.iter().map(|name| PackageName::new(name)).collect();
            let outcomes = dedup::filter_duplicates(&custom, &all, &names)?;

            let mut removed_total = 0usize;
            for outcome in &outcomes {
                if !outcome.has_custom {
                    println!("  {} has no custom build, left as-is", outcome.package);
                    continue;
                }
                for filename in &outcome.removed {
                    println!("  removed {filename}");
                }
                removed_total += outcome.removed.len();
            }
            println!("  {removed_total} duplicates removed");

            if let Some(wheel) = check_wheel {
                let mismatches = validate::check_pinned_deps(&wheel, &custom)?;
                for mismatch in &mismatches {
                    println!("  warn: {mismatch}");
                }
                if mismatches.is_empty() {
                    println!("  declared pins match custom builds");
                }
            }
        }
        Commands::Index {
            wheels,
            output,
            variant,
            base_url,
            project_version,
            gpu_arch,
        } => {
            let config = IndexConfig {
                variant,
                base_url,
                project_version,
                gpu_arch,
            };
            let summary = index::generate(&wheels, &output, &config)?;
            println!(
                "  indexed {} packages ({} archives) under {}",
                summary.packages,
                summary.archives,
                output.display()
            );
        }
        Commands::Organize { artifacts, output } => {
            let summary = organize::organize(&artifacts, &output, organize::SIZE_LIMIT)?;

            println!("  {} wheels organized", summary.total);
            println!(
                "    large (releases): {} ({:.2} GB)",
                summary.large.len(),
                summary.large_bytes as f64 / f64::from(1 << 30)
            );
            println!(
                "    small (pages): {} ({:.1} MB)",
                summary.small.len(),
                summary.small_bytes as f64 / f64::from(1 << 20)
            );
            for (filename, size) in summary.large.iter().take(5) {
                println!("    {filename} ({:.1} MB)", *size as f64 / f64::from(1 << 20));
            }
            if summary.failed > 0 {
                eprintln!("  warn: {} wheels failed to copy", summary.failed);
                std::process::exit(1);
            }
        }
        Commands::Upload {
            wheels,
            index,
            commit,
            branch,
            version,
            release,
            dry_run,
        } => {
            let config = store_config()?;
            let tags = ScopeTags {
                branch,
                version,
                is_release: release,
            };

            if dry_run {
                for prefix in tags.prefixes(&config.namespace, &commit) {
                    println!("  dry run: would publish to {prefix}/");
                }
                return Ok(());
            }

            let op = config.operator().context("failed to build store operator")?;
            let uploader = Uploader::new(op, config.namespace);
            let summary = uploader.publish(&wheels, &index, &commit, &tags).await?;

            for destination in &summary.destinations {
                println!("  published {} files to {destination}/", summary.files);
            }
        }
    }

    Ok(())
}
