//! Pipeline logic for the wheelhouse release pipeline.
//!
//! Each module is one pipeline stage, and every stage is a pure function of
//! its input directories/files and explicit arguments. There is no ambient
//! global state: even the force-rebuild flag arrives as a config field, set
//! by the caller from whatever trigger it answers to.
//!
//! Control flow across a run: [`cache`] (hit/miss decision) -> external
//! build -> [`pin`] -> external build -> [`dedup`] -> [`index`] ->
//! [`store`]. [`organize`] splits wheels by size class for publication
//! channels with different limits.

pub mod cache;
pub mod dedup;
pub mod index;
pub mod mapping;
pub mod organize;
pub mod pin;
pub mod requirements;
pub mod store;
pub mod validate;

pub use cache::{BuildArgs, BuildCache, CacheConfig, CacheKey, CacheStatus};
pub use mapping::Mapping;
pub use store::{ScopeTags, StoreConfig, Uploader};
