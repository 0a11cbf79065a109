//! The analysis-engine boundary.
//!
//! The orchestrator never parses or type-checks anything itself. It hands a
//! [`ChangeSet`] and the previous program to an [`AnalysisEngine`] and asks
//! the resulting program for diagnostics, live dependency edges, and the
//! artifacts it would emit.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use kiln_cache::{ArtifactKind, ChangeSet};
use kiln_common::FileSystem;
use kiln_config::{load_config_from_str, ConfigError, ProjectConfig, ResolvedProject};
use kiln_diagnostics::Diagnostic;

/// Errors that make an analysis cycle fatal.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// The engine could not read or accept the project configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The engine failed for any other reason.
    #[error("analysis failed: {reason}")]
    Engine {
        /// What went wrong.
        reason: String,
    },
}

/// An artifact the engine would emit for the current program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedArtifact {
    /// Absolute target path.
    pub path: PathBuf,
    /// Full artifact contents.
    pub content: Vec<u8>,
    /// Logical paths of the units that produced it.
    pub sources: BTreeSet<PathBuf>,
    /// What the artifact contains.
    pub kind: ArtifactKind,
    /// Set when the engine knows the artifact must be rewritten regardless
    /// of the change set.
    pub stale: bool,
}

/// A semantic analysis backend.
///
/// `Program` is the engine's opaque analyzed state. The session keeps the
/// last successful program and passes it back on the next cycle so the
/// engine can reuse whatever the change set says is still valid.
pub trait AnalysisEngine {
    /// The engine's analyzed program state.
    type Program;

    /// Reads and validates the project descriptor at `path`.
    fn parse_project_config(
        &self,
        path: &Path,
        fs: &dyn FileSystem,
    ) -> Result<ProjectConfig, ConfigError> {
        let bytes = fs.read(path).map_err(|e| {
            if e.is_not_found() {
                ConfigError::NotFound(path.parent().unwrap_or(path).to_path_buf())
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;
        let text = String::from_utf8(bytes)
            .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))?;
        load_config_from_str(&text)
    }

    /// Builds a new program, reusing `prior` for units the change set leaves untouched.
    ///
    /// `prior` is `None` on the first cycle and after a configuration reload.
    fn create_or_update_program(
        &self,
        project: &ResolvedProject,
        prior: Option<&Self::Program>,
        changes: &ChangeSet,
        fs: &dyn FileSystem,
    ) -> Result<Self::Program, AnalysisError>;

    /// Returns every diagnostic for the whole program, in engine order.
    fn diagnostics(&self, program: &Self::Program) -> Vec<Diagnostic>;

    /// Returns every artifact the program would emit.
    fn emit_plan(&self, project: &ResolvedProject, program: &Self::Program) -> Vec<PlannedArtifact>;

    /// Returns the live dependency edges: every analyzed unit and the units it references.
    fn units(&self, program: &Self::Program) -> BTreeMap<PathBuf, BTreeSet<PathBuf>>;
}
