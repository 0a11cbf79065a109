//! Emit sequencing: deciding which artifacts to write and writing them.
//!
//! An artifact is rewritten only when it is *affected*: the engine marked it
//! stale, one of its producing units is in the affected set, it is new, its
//! producer set changed, or its target went missing. An affected artifact
//! whose bytes hash to the recorded value is confirmed but not rewritten.
//! Everything else is carried forward from the previous snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiln_cache::{ArtifactRecord, BuildSnapshot, ChangeSet};
use kiln_common::{ContentHash, FileSystem, FsError};
use kiln_diagnostics::{Category, Diagnostic, DiagnosticCode};

use crate::engine::PlannedArtifact;
use crate::observer::BuildObserver;

const WRITE_FAILED: DiagnosticCode = DiagnosticCode::new(Category::Output, 201);
const REMOVE_FAILED: DiagnosticCode = DiagnosticCode::new(Category::Output, 202);

/// Errors returned by an [`OutputSink`].
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The underlying file system failed.
    #[error(transparent)]
    Fs(#[from] FsError),

    /// The sink refused the operation.
    #[error("sink rejected {path}: {reason}")]
    Rejected {
        /// The artifact path.
        path: PathBuf,
        /// Why it was refused.
        reason: String,
    },
}

impl SinkError {
    /// Returns `true` if the target did not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SinkError::Fs(e) if e.is_not_found())
    }
}

/// Destination for emitted artifacts.
pub trait OutputSink {
    /// Writes an artifact, replacing any previous contents.
    fn write(&self, path: &Path, data: &[u8]) -> Result<(), SinkError>;

    /// Deletes an artifact.
    fn remove(&self, path: &Path) -> Result<(), SinkError>;

    /// Returns `true` if an artifact exists at `path`.
    fn exists(&self, path: &Path) -> bool;
}

/// [`OutputSink`] that writes straight to a [`FileSystem`].
pub struct FsSink {
    fs: Arc<dyn FileSystem>,
}

impl FsSink {
    /// Creates a sink over `fs`.
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }
}

impl OutputSink for FsSink {
    fn write(&self, path: &Path, data: &[u8]) -> Result<(), SinkError> {
        Ok(self.fs.write(path, data)?)
    }

    fn remove(&self, path: &Path) -> Result<(), SinkError> {
        Ok(self.fs.remove(path)?)
    }

    fn exists(&self, path: &Path) -> bool {
        self.fs.exists(path)
    }
}

/// What one emit pass did.
#[derive(Debug, Clone, Default)]
pub struct EmitResult {
    /// Artifacts written this cycle.
    pub emitted: Vec<PathBuf>,
    /// Affected artifacts whose bytes were already on disk.
    pub skipped: Vec<PathBuf>,
    /// Unaffected artifacts carried forward from the previous snapshot.
    pub carried: Vec<PathBuf>,
    /// Artifacts whose write failed.
    pub failed: Vec<PathBuf>,
    /// Orphaned artifacts deleted this cycle.
    pub removed: Vec<PathBuf>,
    /// Write and removal failures.
    pub diagnostics: Vec<Diagnostic>,
    /// Records to store in the next snapshot.
    pub records: BTreeMap<PathBuf, ArtifactRecord>,
    /// Units whose artifacts were not all written.
    pub incomplete: BTreeSet<PathBuf>,
    /// Stale artifacts that could not be deleted.
    pub pending_removals: BTreeSet<PathBuf>,
}

impl EmitResult {
    /// Returns `true` if anything on disk changed or failed to change.
    pub fn touched_outputs(&self) -> bool {
        !(self.emitted.is_empty() && self.removed.is_empty() && self.failed.is_empty())
    }
}

/// Decides and performs the writes for one cycle.
pub struct EmitSequencer<'a> {
    changes: &'a ChangeSet,
    prior: Option<&'a BuildSnapshot>,
    leftovers: BTreeSet<PathBuf>,
}

impl<'a> EmitSequencer<'a> {
    /// Creates a sequencer for a refined change set and the previous snapshot.
    pub fn new(changes: &'a ChangeSet, prior: Option<&'a BuildSnapshot>) -> Self {
        Self {
            changes,
            prior,
            leftovers: BTreeSet::new(),
        }
    }

    /// Adds outputs owned by a discarded snapshot. Any that are not planned
    /// this cycle are removed with the other orphans.
    pub fn with_leftovers(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.leftovers.extend(paths);
        self
    }

    fn prior_record(&self, path: &Path) -> Option<&'a ArtifactRecord> {
        self.prior.and_then(|p| p.artifacts.get(path))
    }

    /// Returns `true` if `artifact` has to be reconsidered this cycle.
    pub fn is_affected(&self, artifact: &PlannedArtifact, sink: &dyn OutputSink) -> bool {
        if artifact.stale {
            return true;
        }
        if artifact.sources.iter().any(|s| self.changes.is_affected(s)) {
            return true;
        }
        match self.prior_record(&artifact.path) {
            None => true,
            Some(record) => record.sources != artifact.sources || !sink.exists(&artifact.path),
        }
    }

    /// Writes every affected artifact in `plan` and removes orphans.
    ///
    /// Per-artifact failures do not stop the pass: the artifact is reported,
    /// its previous record (if any) is kept, and its producing units are
    /// marked incomplete. An orphan that cannot be deleted is kept in
    /// [`EmitResult::pending_removals`] for the next cycle to retry.
    pub fn emit(
        &self,
        plan: &[PlannedArtifact],
        sink: &dyn OutputSink,
        observer: &dyn BuildObserver,
    ) -> EmitResult {
        let mut result = EmitResult::default();

        for artifact in plan {
            let path = &artifact.path;
            let prior = self.prior_record(path);

            if !self.is_affected(artifact, sink) {
                if let Some(record) = prior {
                    result.records.insert(path.clone(), record.clone());
                }
                result.carried.push(path.clone());
                continue;
            }

            let record = ArtifactRecord {
                content_hash: ContentHash::from_bytes(&artifact.content),
                sources: artifact.sources.clone(),
                kind: artifact.kind,
                size: artifact.content.len() as u64,
            };

            let identical = prior.is_some_and(|p| {
                p.content_hash == record.content_hash && p.kind == record.kind
            });
            if identical && sink.exists(path) {
                tracing::debug!(path = %path.display(), "artifact unchanged");
                result.skipped.push(path.clone());
                result.records.insert(path.clone(), record);
                continue;
            }

            match sink.write(path, &artifact.content) {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), size = record.size, "artifact written");
                    observer.artifact_written(path, record.size, &record.sources);
                    result.emitted.push(path.clone());
                    result.records.insert(path.clone(), record);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), "artifact write failed: {e}");
                    let units: Vec<String> = artifact
                        .sources
                        .iter()
                        .map(|s| s.display().to_string())
                        .collect();
                    result.diagnostics.push(
                        Diagnostic::error(
                            WRITE_FAILED,
                            format!("failed to write {}: {e}", path.display()),
                        )
                        .with_note(format!("produced by {}", units.join(", "))),
                    );
                    result.failed.push(path.clone());
                    result.incomplete.extend(artifact.sources.iter().cloned());
                    if let Some(old) = prior {
                        result.records.insert(path.clone(), old.clone());
                    }
                }
            }
        }

        let planned: BTreeSet<&Path> = plan.iter().map(|a| a.path.as_path()).collect();
        let mut orphans: BTreeSet<&Path> = self.leftovers.iter().map(PathBuf::as_path).collect();
        if let Some(prior) = self.prior {
            orphans.extend(prior.owned_outputs());
        }
        for path in orphans.into_iter().filter(|p| !planned.contains(p)) {
            match sink.remove(path) {
                Ok(()) => result.removed.push(path.to_path_buf()),
                Err(e) if e.is_not_found() => result.removed.push(path.to_path_buf()),
                Err(e) => {
                    tracing::warn!(path = %path.display(), "orphan removal failed: {e}");
                    result.diagnostics.push(
                        Diagnostic::warning(
                            REMOVE_FAILED,
                            format!("failed to remove stale artifact {}: {e}", path.display()),
                        )
                        .with_note("removal is retried on the next build"),
                    );
                    result.pending_removals.insert(path.to_path_buf());
                }
            }
        }

        tracing::debug!(
            emitted = result.emitted.len(),
            skipped = result.skipped.len(),
            carried = result.carried.len(),
            failed = result.failed.len(),
            removed = result.removed.len(),
            "emit complete"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::NullObserver;
    use kiln_cache::{ArtifactKind, UnitRecord};
    use kiln_common::MemoryFileSystem;
    use std::cell::RefCell;

    fn planned(path: &str, content: &str, source: &str) -> PlannedArtifact {
        PlannedArtifact {
            path: PathBuf::from(path),
            content: content.as_bytes().to_vec(),
            sources: BTreeSet::from([PathBuf::from(source)]),
            kind: ArtifactKind::Output,
            stale: false,
        }
    }

    fn prior_with(artifacts: &[(&str, &str, &str)]) -> BuildSnapshot {
        let mut s = BuildSnapshot::new("0.1.0", ContentHash::from_bytes(b"o"));
        for &(path, content, source) in artifacts {
            s.units.entry(PathBuf::from(source)).or_insert(UnitRecord {
                fingerprint: ContentHash::from_bytes(source.as_bytes()),
                dependencies: BTreeSet::new(),
                artifacts: BTreeSet::new(),
            });
            s.link_artifact(
                PathBuf::from(path),
                ArtifactRecord {
                    content_hash: ContentHash::from_bytes(content.as_bytes()),
                    sources: BTreeSet::from([PathBuf::from(source)]),
                    kind: ArtifactKind::Output,
                    size: content.len() as u64,
                },
            );
        }
        s
    }

    fn affected(paths: &[&str]) -> ChangeSet {
        ChangeSet {
            affected: paths.iter().map(PathBuf::from).collect(),
            ..ChangeSet::default()
        }
    }

    #[derive(Default)]
    struct Recorder(RefCell<Vec<PathBuf>>);

    impl BuildObserver for Recorder {
        fn artifact_written(&self, path: &Path, _size: u64, _sources: &BTreeSet<PathBuf>) {
            self.0.borrow_mut().push(path.to_path_buf());
        }
    }

    #[test]
    fn fresh_build_writes_everything() {
        let fs = Arc::new(MemoryFileSystem::new());
        let sink = FsSink::new(fs.clone());
        let changes = affected(&["a.kl", "b.kl"]);
        let plan = [planned("/o/a.out", "A", "a.kl"), planned("/o/b.out", "B", "b.kl")];
        let observer = Recorder::default();

        let result = EmitSequencer::new(&changes, None).emit(&plan, &sink, &observer);
        assert_eq!(result.emitted.len(), 2);
        assert_eq!(fs.get(Path::new("/o/a.out")).unwrap(), b"A");
        assert_eq!(observer.0.borrow().len(), 2);
        assert_eq!(result.records.len(), 2);
    }

    #[test]
    fn unaffected_artifacts_are_carried_forward() {
        let fs = Arc::new(MemoryFileSystem::new());
        fs.insert("/o/a.out", "A");
        let sink = FsSink::new(fs.clone());
        let prior = prior_with(&[("/o/a.out", "A", "a.kl")]);
        let changes = ChangeSet::default();
        let plan = [planned("/o/a.out", "A", "a.kl")];

        let result = EmitSequencer::new(&changes, Some(&prior)).emit(&plan, &sink, &NullObserver);
        assert!(result.emitted.is_empty());
        assert_eq!(result.carried, vec![PathBuf::from("/o/a.out")]);
        assert_eq!(
            result.records[Path::new("/o/a.out")],
            prior.artifacts[Path::new("/o/a.out")]
        );
        assert!(fs.take_write_log().is_empty());
    }

    #[test]
    fn affected_but_identical_is_skipped() {
        let fs = Arc::new(MemoryFileSystem::new());
        fs.insert("/o/a.out", "A");
        let sink = FsSink::new(fs.clone());
        let prior = prior_with(&[("/o/a.out", "A", "a.kl")]);
        let changes = affected(&["a.kl"]);
        let plan = [planned("/o/a.out", "A", "a.kl")];

        let result = EmitSequencer::new(&changes, Some(&prior)).emit(&plan, &sink, &NullObserver);
        assert_eq!(result.skipped, vec![PathBuf::from("/o/a.out")]);
        assert!(!result.touched_outputs());
    }

    #[test]
    fn identical_but_missing_target_is_rewritten() {
        let fs = Arc::new(MemoryFileSystem::new());
        let sink = FsSink::new(fs.clone());
        let prior = prior_with(&[("/o/a.out", "A", "a.kl")]);
        let changes = ChangeSet::default();
        let plan = [planned("/o/a.out", "A", "a.kl")];

        let result = EmitSequencer::new(&changes, Some(&prior)).emit(&plan, &sink, &NullObserver);
        assert_eq!(result.emitted, vec![PathBuf::from("/o/a.out")]);
        assert!(fs.exists(Path::new("/o/a.out")));
    }

    #[test]
    fn stale_flag_forces_reconsideration() {
        let fs = Arc::new(MemoryFileSystem::new());
        fs.insert("/o/a.out", "old");
        let sink = FsSink::new(fs.clone());
        let prior = prior_with(&[("/o/a.out", "old", "a.kl")]);
        let changes = ChangeSet::default();
        let mut artifact = planned("/o/a.out", "new", "a.kl");
        artifact.stale = true;

        let result =
            EmitSequencer::new(&changes, Some(&prior)).emit(&[artifact], &sink, &NullObserver);
        assert_eq!(result.emitted.len(), 1);
        assert_eq!(fs.get(Path::new("/o/a.out")).unwrap(), b"new");
    }

    #[test]
    fn producer_change_makes_artifact_affected() {
        let fs = Arc::new(MemoryFileSystem::new());
        fs.insert("/o/a.out", "A");
        let sink = FsSink::new(fs.clone());
        let prior = prior_with(&[("/o/a.out", "A", "a.kl")]);
        let changes = ChangeSet::default();
        let plan = [planned("/o/a.out", "A", "other.kl")];

        let seq = EmitSequencer::new(&changes, Some(&prior));
        assert!(seq.is_affected(&plan[0], &sink));
        let result = seq.emit(&plan, &sink, &NullObserver);
        assert_eq!(
            result.records[Path::new("/o/a.out")].sources,
            BTreeSet::from([PathBuf::from("other.kl")])
        );
    }

    #[test]
    fn failed_write_marks_units_incomplete_and_continues() {
        let fs = Arc::new(MemoryFileSystem::new());
        fs.fail_writes_to("/o/b.out");
        let sink = FsSink::new(fs.clone());
        let changes = affected(&["a.kl", "b.kl", "c.kl"]);
        let plan = [
            planned("/o/a.out", "A", "a.kl"),
            planned("/o/b.out", "B", "b.kl"),
            planned("/o/c.out", "C", "c.kl"),
        ];

        let result = EmitSequencer::new(&changes, None).emit(&plan, &sink, &NullObserver);
        assert_eq!(result.emitted.len(), 2);
        assert_eq!(result.failed, vec![PathBuf::from("/o/b.out")]);
        assert_eq!(result.incomplete, BTreeSet::from([PathBuf::from("b.kl")]));
        assert!(!result.records.contains_key(Path::new("/o/b.out")));
        assert_eq!(result.diagnostics.len(), 1);
        assert!(result.diagnostics[0].severity.is_error());
        assert!(fs.exists(Path::new("/o/c.out")));
    }

    #[test]
    fn failed_rewrite_keeps_previous_record() {
        let fs = Arc::new(MemoryFileSystem::new());
        fs.insert("/o/a.out", "A");
        fs.fail_writes_to("/o/a.out");
        let sink = FsSink::new(fs.clone());
        let prior = prior_with(&[("/o/a.out", "A", "a.kl")]);
        let changes = affected(&["a.kl"]);
        let plan = [planned("/o/a.out", "A2", "a.kl")];

        let result = EmitSequencer::new(&changes, Some(&prior)).emit(&plan, &sink, &NullObserver);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(
            result.records[Path::new("/o/a.out")],
            prior.artifacts[Path::new("/o/a.out")]
        );
    }

    #[test]
    fn orphans_are_removed() {
        let fs = Arc::new(MemoryFileSystem::new());
        fs.insert("/o/a.out", "A");
        fs.insert("/o/gone.out", "G");
        let sink = FsSink::new(fs.clone());
        let prior = prior_with(&[("/o/a.out", "A", "a.kl"), ("/o/gone.out", "G", "gone.kl")]);
        let changes = affected(&["gone.kl"]);
        let plan = [planned("/o/a.out", "A", "a.kl")];

        let result = EmitSequencer::new(&changes, Some(&prior)).emit(&plan, &sink, &NullObserver);
        assert_eq!(result.removed, vec![PathBuf::from("/o/gone.out")]);
        assert!(!fs.exists(Path::new("/o/gone.out")));
        assert!(!result.records.contains_key(Path::new("/o/gone.out")));
    }

    #[test]
    fn already_missing_orphan_counts_as_removed() {
        let fs = Arc::new(MemoryFileSystem::new());
        let sink = FsSink::new(fs.clone());
        let prior = prior_with(&[("/o/gone.out", "G", "gone.kl")]);
        let changes = ChangeSet::default();

        let result = EmitSequencer::new(&changes, Some(&prior)).emit(&[], &sink, &NullObserver);
        assert_eq!(result.removed, vec![PathBuf::from("/o/gone.out")]);
        assert!(result.diagnostics.is_empty());
    }

    /// Writes through to the file system but refuses every delete.
    struct NoDeleteSink(FsSink);

    impl OutputSink for NoDeleteSink {
        fn write(&self, path: &Path, data: &[u8]) -> Result<(), SinkError> {
            self.0.write(path, data)
        }

        fn remove(&self, path: &Path) -> Result<(), SinkError> {
            Err(SinkError::Rejected {
                path: path.to_path_buf(),
                reason: "read-only".to_string(),
            })
        }

        fn exists(&self, path: &Path) -> bool {
            self.0.exists(path)
        }
    }

    #[test]
    fn failed_orphan_removal_is_retried_next_cycle() {
        let fs = Arc::new(MemoryFileSystem::new());
        fs.insert("/o/a.out", "A");
        fs.insert("/o/c.out", "C");
        let prior = prior_with(&[("/o/a.out", "A", "a.kl"), ("/o/c.out", "C", "c.kl")]);
        let changes = affected(&["c.kl"]);
        let plan = [planned("/o/a.out", "A", "a.kl")];

        let stuck = NoDeleteSink(FsSink::new(fs.clone()));
        let first = EmitSequencer::new(&changes, Some(&prior)).emit(&plan, &stuck, &NullObserver);
        assert!(first.removed.is_empty());
        assert_eq!(first.diagnostics.len(), 1);
        assert_eq!(first.diagnostics[0].code, REMOVE_FAILED);
        assert!(!first.diagnostics[0].severity.is_error());
        assert_eq!(first.pending_removals, BTreeSet::from([PathBuf::from("/o/c.out")]));
        assert!(!first.records.contains_key(Path::new("/o/c.out")));

        // The next snapshot keeps only a.out as an artifact; c.out survives as
        // a pending removal.
        let mut next = BuildSnapshot::new("0.1.0", ContentHash::from_bytes(b"o"));
        next.units = prior.units.clone();
        next.units.remove(Path::new("c.kl"));
        for (path, record) in first.records {
            next.link_artifact(path, record);
        }
        next.pending_removals = first.pending_removals;

        let healthy = FsSink::new(fs.clone());
        let unchanged = ChangeSet::default();
        let second =
            EmitSequencer::new(&unchanged, Some(&next)).emit(&plan, &healthy, &NullObserver);
        assert_eq!(second.removed, vec![PathBuf::from("/o/c.out")]);
        assert!(second.pending_removals.is_empty());
        assert!(second.diagnostics.is_empty());
        assert!(!fs.exists(Path::new("/o/c.out")));
        assert!(fs.exists(Path::new("/o/a.out")));
    }

    #[test]
    fn leftovers_are_pruned_unless_planned() {
        let fs = Arc::new(MemoryFileSystem::new());
        fs.insert("/o/a.out", "A");
        fs.insert("/o/a.bin", "A");
        let sink = FsSink::new(fs.clone());
        let changes = affected(&["a.kl"]);
        let plan = [planned("/o/a.bin", "A", "a.kl")];

        let result = EmitSequencer::new(&changes, None)
            .with_leftovers([PathBuf::from("/o/a.out"), PathBuf::from("/o/a.bin")])
            .emit(&plan, &sink, &NullObserver);
        assert_eq!(result.removed, vec![PathBuf::from("/o/a.out")]);
        assert!(!fs.exists(Path::new("/o/a.out")));
        assert!(fs.exists(Path::new("/o/a.bin")));
    }
}
