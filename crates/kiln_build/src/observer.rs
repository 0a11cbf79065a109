//! Progress reporting hooks.
//!
//! Observers are informational: nothing they do feeds back into the cycle.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::driver::{CyclePhase, CycleReport};

/// Receives progress notifications from the [`SessionDriver`](crate::SessionDriver).
///
/// Every method has an empty default so implementations only pick what they need.
pub trait BuildObserver {
    /// The driver entered `phase`.
    fn phase_changed(&self, _phase: CyclePhase) {}

    /// An artifact was written to its target.
    fn artifact_written(&self, _path: &Path, _size: u64, _sources: &BTreeSet<PathBuf>) {}

    /// A cycle finished, successfully or not.
    fn cycle_finished(&self, _report: &CycleReport) {}
}

/// Ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl BuildObserver for NullObserver {}

/// Forwards notifications to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl BuildObserver for TracingObserver {
    fn phase_changed(&self, phase: CyclePhase) {
        tracing::trace!(?phase, "phase");
    }

    fn artifact_written(&self, path: &Path, size: u64, sources: &BTreeSet<PathBuf>) {
        tracing::debug!(
            path = %path.display(),
            size,
            sources = sources.len(),
            "artifact written"
        );
    }

    fn cycle_finished(&self, report: &CycleReport) {
        tracing::info!(
            emitted = report.emitted.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            removed = report.removed.len(),
            diagnostics = report.diagnostics.len(),
            elapsed_ms = report.duration.as_millis() as u64,
            "cycle finished"
        );
    }
}
