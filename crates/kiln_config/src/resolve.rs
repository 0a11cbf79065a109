//! Project resolution: turning a descriptor into concrete paths.

use crate::error::ConfigError;
use crate::types::{ProjectConfig, CONFIG_FILE};
use std::path::{Path, PathBuf};

/// A project descriptor bound to the directory it was loaded from.
///
/// Input Units are identified by *logical* paths relative to `project_dir`;
/// [`absolute`](Self::absolute) maps them onto the file system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProject {
    /// Directory containing `kiln.toml`.
    pub project_dir: PathBuf,
    /// The parsed descriptor.
    pub config: ProjectConfig,
    /// Normalized logical root paths, deduplicated, in declaration order.
    pub roots: Vec<PathBuf>,
    /// Absolute output directory.
    pub out_dir: PathBuf,
    /// Absolute path of the build-state (meta) artifact.
    pub state_path: PathBuf,
}

impl ResolvedProject {
    /// Resolves every path in `config` against `project_dir`.
    ///
    /// Fails if a root is absolute or climbs out of the project directory.
    pub fn resolve(project_dir: &Path, config: ProjectConfig) -> Result<Self, ConfigError> {
        let mut roots = Vec::with_capacity(config.inputs.roots.len());
        for root in &config.inputs.roots {
            let normalized = kiln_common::path::normalize(Path::new(root)).ok_or_else(|| {
                ConfigError::ValidationError(format!(
                    "root '{root}' must be a relative path inside the project"
                ))
            })?;
            if !roots.contains(&normalized) {
                roots.push(normalized);
            }
        }

        let out_dir = project_dir.join(&config.build.out_dir);
        let state_path = out_dir.join(&config.build.state_file);

        Ok(Self {
            project_dir: project_dir.to_path_buf(),
            config,
            roots,
            out_dir,
            state_path,
        })
    }

    /// Path of the project descriptor.
    pub fn config_path(&self) -> PathBuf {
        self.project_dir.join(CONFIG_FILE)
    }

    /// Maps a logical unit path onto the file system.
    pub fn absolute(&self, logical: &Path) -> PathBuf {
        self.project_dir.join(logical)
    }

    /// Maps an absolute path back to a logical path, if it is inside the project.
    pub fn logical(&self, absolute: &Path) -> Option<PathBuf> {
        absolute
            .strip_prefix(&self.project_dir)
            .ok()
            .and_then(kiln_common::path::normalize)
    }

    /// Returns `true` if `absolute` lies inside the output directory.
    ///
    /// Covers the build-state file as long as it lives under `out_dir`.
    pub fn is_output(&self, absolute: &Path) -> bool {
        absolute.starts_with(&self.out_dir) || absolute == self.state_path
    }

    /// Output path for a logical unit path, with the configured extension.
    pub fn output_path(&self, logical: &Path) -> PathBuf {
        self.out_dir
            .join(logical)
            .with_extension(&self.config.build.out_extension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_config_from_str;

    fn config(roots: &str) -> ProjectConfig {
        load_config_from_str(&format!(
            "[project]\nname = \"demo\"\n\n[inputs]\nroots = {roots}\n"
        ))
        .unwrap()
    }

    #[test]
    fn resolves_paths() {
        let project =
            ResolvedProject::resolve(Path::new("/work/demo"), config(r#"["./src/main.kl"]"#))
                .unwrap();
        assert_eq!(project.roots, vec![PathBuf::from("src/main.kl")]);
        assert_eq!(project.out_dir, PathBuf::from("/work/demo/out"));
        assert_eq!(
            project.state_path,
            PathBuf::from("/work/demo/out/kiln.buildinfo")
        );
        assert_eq!(project.config_path(), PathBuf::from("/work/demo/kiln.toml"));
    }

    #[test]
    fn duplicate_roots_collapse() {
        let project = ResolvedProject::resolve(
            Path::new("/p"),
            config(r#"["a.kl", "./a.kl", "b.kl"]"#),
        )
        .unwrap();
        assert_eq!(
            project.roots,
            vec![PathBuf::from("a.kl"), PathBuf::from("b.kl")]
        );
    }

    #[test]
    fn escaping_root_rejected() {
        let err = ResolvedProject::resolve(Path::new("/p"), config(r#""../x.kl""#)).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn logical_and_output_mapping() {
        let project = ResolvedProject::resolve(Path::new("/p"), config(r#""a.kl""#)).unwrap();
        assert_eq!(
            project.logical(Path::new("/p/src/a.kl")),
            Some(PathBuf::from("src/a.kl"))
        );
        assert_eq!(project.logical(Path::new("/elsewhere/a.kl")), None);
        assert_eq!(
            project.output_path(Path::new("src/a.kl")),
            PathBuf::from("/p/out/src/a.out")
        );
        assert!(project.is_output(Path::new("/p/out/src/a.out")));
        assert!(!project.is_output(Path::new("/p/src/a.kl")));
    }
}
