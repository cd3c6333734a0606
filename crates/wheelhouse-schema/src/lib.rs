//! Shared leaf types for the wheelhouse release pipeline.
//!
//! Everything here is a plain value type: normalized package names, parsed
//! archive filenames, and SHA-256 digests. The pipeline logic lives in
//! `wheelhouse-core`; this crate has no I/O beyond hashing files.

pub mod hash;
pub mod name;
pub mod wheel;

// Re-exports
pub use hash::Sha256Digest;
pub use name::PackageName;
pub use wheel::{ArchiveName, WheelFilename, WheelParseError};
