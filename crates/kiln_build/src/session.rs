//! The analysis session: one engine, one retained program.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use kiln_cache::ChangeSet;
use kiln_common::FileSystem;
use kiln_config::ResolvedProject;
use kiln_diagnostics::{sort_diagnostics, Diagnostic};

use crate::engine::{AnalysisEngine, AnalysisError, PlannedArtifact};

/// Everything the rest of the cycle needs from a successful analysis.
#[derive(Debug, Clone, Default)]
pub struct Analysis {
    /// Complete diagnostics for the whole project, in reporting order.
    pub diagnostics: Vec<Diagnostic>,
    /// Live dependency edges reported by the engine.
    pub units: BTreeMap<PathBuf, BTreeSet<PathBuf>>,
    /// Artifacts the program would emit, sorted by target path.
    pub plan: Vec<PlannedArtifact>,
}

/// Wraps an [`AnalysisEngine`] and keeps the last successful program.
///
/// The first update runs a full analysis. Later updates pass the retained
/// program back to the engine. A failed update leaves the retained program
/// untouched so the next cycle starts from the last good state.
pub struct AnalysisSession<E: AnalysisEngine> {
    engine: E,
    program: Option<E::Program>,
}

impl<E: AnalysisEngine> AnalysisSession<E> {
    /// Creates a session with no program yet.
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            program: None,
        }
    }

    /// Returns the wrapped engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Returns the retained program, if any update has succeeded.
    pub fn program(&self) -> Option<&E::Program> {
        self.program.as_ref()
    }

    /// Drops the retained program so the next update is a full analysis.
    pub fn reset(&mut self) {
        self.program = None;
    }

    /// Analyzes the project for one cycle.
    pub fn update(
        &mut self,
        project: &ResolvedProject,
        changes: &ChangeSet,
        fs: &dyn FileSystem,
    ) -> Result<Analysis, AnalysisError> {
        let full = self.program.is_none();
        let program =
            self.engine
                .create_or_update_program(project, self.program.as_ref(), changes, fs)?;

        let mut diagnostics = self.engine.diagnostics(&program);
        sort_diagnostics(&mut diagnostics);

        let mut plan = self.engine.emit_plan(project, &program);
        plan.sort_by(|a, b| a.path.cmp(&b.path));

        let units = self.engine.units(&program);
        tracing::debug!(
            full,
            units = units.len(),
            diagnostics = diagnostics.len(),
            artifacts = plan.len(),
            "analysis complete"
        );

        self.program = Some(program);
        Ok(Analysis {
            diagnostics,
            units,
            plan,
        })
    }
}
