//! Build-state caching and change detection.
//!
//! This crate owns the persisted [`BuildSnapshot`]: the [`BuildStateStore`]
//! loads it fail-safe and replaces it atomically, and the [`ChangeDetector`]
//! compares current input fingerprints against it to produce the per-cycle
//! [`ChangeSet`] and its affected closure.

#![warn(missing_docs)]

pub mod detector;
pub mod error;
pub mod graph;
pub mod snapshot;
pub mod store;

pub use detector::{ChangeDetector, ChangeSet};
pub use error::CacheError;
pub use snapshot::{ArtifactKind, ArtifactRecord, BuildSnapshot, UnitRecord};
pub use store::{BuildStateStore, PersistOutcome};
