//! Parsing and validation of `kiln.toml` project descriptors.
//!
//! This crate reads the project descriptor and produces a strongly-typed
//! [`ProjectConfig`], plus a [`ResolvedProject`] with every path made
//! concrete for one project directory.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod resolve;
pub mod types;

pub use error::ConfigError;
pub use loader::{find_project_root, load_config, load_config_from_str};
pub use resolve::ResolvedProject;
pub use types::*;
