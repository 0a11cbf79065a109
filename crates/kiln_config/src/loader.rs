//! Project descriptor discovery, loading, and validation.

use crate::error::ConfigError;
use crate::types::{ProjectConfig, CONFIG_FILE};
use std::path::{Path, PathBuf};

/// Walks up from `start` looking for the nearest directory containing `kiln.toml`.
pub fn find_project_root(start: &Path) -> Result<PathBuf, ConfigError> {
    let mut current = start.to_path_buf();
    loop {
        if current.join(CONFIG_FILE).is_file() {
            return Ok(current);
        }
        if !current.pop() {
            return Err(ConfigError::NotFound(start.to_path_buf()));
        }
    }
}

/// Loads and validates `kiln.toml` from a project directory.
pub fn load_config(project_dir: &Path) -> Result<ProjectConfig, ConfigError> {
    let config_path = project_dir.join(CONFIG_FILE);
    let content = std::fs::read_to_string(&config_path)?;
    load_config_from_str(&content)
}

/// Parses and validates a `kiln.toml` descriptor from a string.
///
/// Useful for testing and for engines that read the descriptor through their
/// own file-system handle.
pub fn load_config_from_str(content: &str) -> Result<ProjectConfig, ConfigError> {
    let config: ProjectConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Validates that required fields are present and values are consistent.
fn validate_config(config: &ProjectConfig) -> Result<(), ConfigError> {
    if config.project.name.is_empty() {
        return Err(ConfigError::MissingField("project.name".to_string()));
    }
    if config.inputs.roots.is_empty() {
        return Err(ConfigError::MissingField("inputs.roots".to_string()));
    }
    if config.inputs.roots.iter().any(|r| r.trim().is_empty()) {
        return Err(ConfigError::ValidationError(
            "inputs.roots contains an empty path".to_string(),
        ));
    }
    if config.build.out_dir.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "build.out_dir must not be empty".to_string(),
        ));
    }
    if config.build.state_file.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "build.state_file must not be empty".to_string(),
        ));
    }
    if config.build.out_extension.is_empty() || config.build.out_extension.contains('.') {
        return Err(ConfigError::ValidationError(format!(
            "build.out_extension '{}' must be a non-empty extension without dots",
            config.build.out_extension
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_config() {
        let toml = r#"
[project]
name = "demo"
version = "1.2.0"

[inputs]
roots = ["src/main.kl", "src/extra.kl"]

[build]
out_dir = "dist"
state_file = "state.bin"
source_map = true
out_extension = "txt"

[watch]
debounce_ms = 50
poll_interval_ms = 500
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.project.name, "demo");
        assert_eq!(config.project.version, "1.2.0");
        assert_eq!(config.inputs.roots.len(), 2);
        assert_eq!(config.build.out_dir, "dist");
        assert_eq!(config.build.state_file, "state.bin");
        assert!(config.build.source_map);
        assert_eq!(config.build.out_extension, "txt");
        assert_eq!(config.watch.debounce_ms, 50);
        assert_eq!(config.watch.poll_interval_ms, 500);
    }

    #[test]
    fn missing_name_errors() {
        let toml = r#"
[project]
name = ""

[inputs]
roots = "a.kl"
"#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(_)));
    }

    #[test]
    fn empty_roots_errors() {
        let toml = r#"
[project]
name = "demo"

[inputs]
roots = []
"#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(_)));
    }

    #[test]
    fn missing_inputs_section_is_parse_error() {
        let toml = r#"
[project]
name = "demo"
"#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn dotted_extension_rejected() {
        let toml = r#"
[project]
name = "demo"

[inputs]
roots = "a.kl"

[build]
out_extension = "tar.gz"
"#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn invalid_toml_errors() {
        let err = load_config_from_str("this is not valid toml {{{}}}").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn io_error_from_nonexistent_dir() {
        let err = load_config(Path::new("/nonexistent/dir")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }

    #[test]
    fn find_root_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "").unwrap();
        let nested = dir.path().join("src").join("deep");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(find_project_root(&nested).unwrap(), dir.path());
    }

    #[test]
    fn find_root_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = find_project_root(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}
