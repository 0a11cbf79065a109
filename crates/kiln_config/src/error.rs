//! Error types for configuration loading and validation.

use std::path::PathBuf;

/// Errors that can occur when loading or validating a `kiln.toml` descriptor.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No project descriptor was found.
    #[error("could not find kiln.toml in {0} or any parent directory")]
    NotFound(PathBuf),

    /// An I/O error occurred while reading the descriptor.
    #[error("failed to read configuration: {0}")]
    IoError(#[from] std::io::Error),

    /// The TOML content could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// A required field is missing from the configuration.
    #[error("missing required field: {0}")]
    MissingField(String),

    /// A configuration value failed validation.
    #[error("validation error: {0}")]
    ValidationError(String),
}
