//! Shared foundational types used across the Kiln build orchestrator.
//!
//! This crate provides content hashing for change detection and the
//! [`FileSystem`] boundary through which every other crate reads sources and
//! writes outputs.

#![warn(missing_docs)]

pub mod fs;
pub mod hash;
pub mod path;

pub use fs::{FileSystem, FsError, MemoryFileSystem, OsFileSystem};
pub use hash::{ContentHash, ParseHashError};

/// Version of the toolchain, recorded in build snapshots.
///
/// A snapshot written by a different version is discarded on load.
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");
