//! fastmd-cache - content-addressed build cache for markdown pipelines
//!
//! Avoids recomputing expensive content transformations by keying
//! stored outputs on a fingerprint of everything that can legitimately
//! change them. A host pipeline intercepts each unit twice: `pre`
//! before transforming (serve or go pending) and `post` after
//! (persist). See [`coordinator::CacheCoordinator`].

pub mod accel;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod deps;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod store;

pub use config::{CacheConfig, CacheOptions, DepsMode, Verbosity};
pub use coordinator::{CacheCoordinator, TransformOutput, Unit, WarmEntry};
pub use error::{CacheError, CacheResult};
pub use store::{CacheStore, DiskStore};
