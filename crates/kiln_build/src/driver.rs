//! The session driver: one build cycle and the watch loop around it.
//!
//! A cycle moves through `Detecting → Analyzing → Emitting → Persisting` and
//! back to `Idle`. A fatal analysis skips emit and persist. Emit failures do
//! not; the affected units are persisted as incomplete so the next cycle
//! treats them as modified.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use kiln_cache::{
    BuildSnapshot, BuildStateStore, ChangeDetector, ChangeSet, PersistOutcome, UnitRecord,
};
use kiln_common::{ContentHash, FileSystem, TOOL_VERSION};
use kiln_config::{ConfigError, ResolvedProject, CONFIG_FILE};
use kiln_diagnostics::{Category, Diagnostic, DiagnosticCode, DiagnosticSink, Severity};

use crate::emit::{EmitResult, EmitSequencer, FsSink, OutputSink};
use crate::engine::{AnalysisEngine, AnalysisError};
use crate::observer::{BuildObserver, TracingObserver};
use crate::session::AnalysisSession;
use crate::watch::{FsEvent, PollingWatcher, Trigger, WatchMessage};

const CONFIG_INVALID: DiagnosticCode = DiagnosticCode::new(Category::Config, 1);
const ANALYSIS_ABORTED: DiagnosticCode = DiagnosticCode::new(Category::Analysis, 900);
const PERSIST_FAILED: DiagnosticCode = DiagnosticCode::new(Category::State, 301);

/// Where the driver is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CyclePhase {
    /// Waiting for a trigger.
    Idle,
    /// Fingerprinting inputs against the last snapshot.
    Detecting,
    /// Running the analysis engine.
    Analyzing,
    /// Writing artifacts.
    Emitting,
    /// Replacing the build snapshot.
    Persisting,
    /// The watch loop has ended. Terminal.
    Stopped,
}

/// Errors that end a session rather than a single cycle.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// The project descriptor could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The file-system watcher could not be started.
    #[error("watch error: {reason}")]
    Watch {
        /// What went wrong.
        reason: String,
    },
}

/// Summary of one build cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// No usable snapshot existed, so every unit was treated as added.
    pub full_rebuild: bool,
    /// Number of added units.
    pub added: usize,
    /// Number of modified units.
    pub modified: usize,
    /// Number of removed units.
    pub removed_units: usize,
    /// Size of the affected closure.
    pub affected: usize,
    /// Artifacts written.
    pub emitted: Vec<PathBuf>,
    /// Affected artifacts whose bytes were already current.
    pub skipped: Vec<PathBuf>,
    /// Unaffected artifacts carried forward.
    pub carried: Vec<PathBuf>,
    /// Artifacts whose write failed.
    pub failed: Vec<PathBuf>,
    /// Orphaned artifacts deleted.
    pub removed: Vec<PathBuf>,
    /// Every diagnostic of the cycle, in reporting order.
    pub diagnostics: Vec<Diagnostic>,
    /// Outcome of the snapshot write; `None` if the cycle did not reach it
    /// or the write failed.
    pub persist: Option<PersistOutcome>,
    /// The cycle stopped before emitting.
    pub aborted: bool,
    /// Wall-clock time of the cycle.
    pub duration: Duration,
}

impl CycleReport {
    /// Number of error diagnostics.
    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity.is_error())
            .count()
    }

    /// Number of warning diagnostics.
    pub fn warning_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .count()
    }

    /// Returns `true` if the cycle produced errors, failed writes, or aborted.
    pub fn has_errors(&self) -> bool {
        self.aborted || !self.failed.is_empty() || self.error_count() > 0
    }

    /// One-line human summary.
    pub fn summary(&self) -> String {
        format!(
            "Incremental compilation {} ({} emitted, {} unchanged, {} failed, {} removed, {} error(s), {} warning(s) in {}ms)",
            if self.has_errors() { "failed" } else { "succeeded" },
            self.emitted.len(),
            self.skipped.len() + self.carried.len(),
            self.failed.len(),
            self.removed.len(),
            self.error_count(),
            self.warning_count(),
            self.duration.as_millis()
        )
    }
}

enum Flow {
    Open,
    Closed,
    Stop,
}

/// Drives build cycles for one project.
///
/// Cycles never overlap: [`run_cycle`](Self::run_cycle) takes `&mut self`
/// and the watch loop runs cycles on the calling thread.
pub struct SessionDriver<E: AnalysisEngine> {
    fs: Arc<dyn FileSystem>,
    project: ResolvedProject,
    options: ContentHash,
    session: AnalysisSession<E>,
    store: BuildStateStore,
    detector: ChangeDetector,
    sink: Box<dyn OutputSink>,
    observer: Box<dyn BuildObserver>,
    phase: CyclePhase,
    config_dirty: bool,
    /// Outputs of a snapshot that can no longer be loaded as the prior one.
    leftovers: BTreeSet<PathBuf>,
}

impl<E: AnalysisEngine> SessionDriver<E> {
    /// Loads the project descriptor in `project_dir` through the engine and
    /// prepares a driver for it.
    pub fn new(
        engine: E,
        fs: Arc<dyn FileSystem>,
        project_dir: impl Into<PathBuf>,
    ) -> Result<Self, DriverError> {
        let project_dir = project_dir.into();
        let project = load_project(&engine, fs.as_ref(), &project_dir)?;
        let store = BuildStateStore::new(Arc::clone(&fs), &project.state_path, TOOL_VERSION);
        let detector = ChangeDetector::new(Arc::clone(&fs), &project_dir);
        tracing::debug!(
            project = %project.config.project.name,
            roots = project.roots.len(),
            state = %project.state_path.display(),
            "session opened"
        );
        Ok(Self {
            options: project.config.options_fingerprint(),
            sink: Box::new(FsSink::new(Arc::clone(&fs))),
            observer: Box::new(TracingObserver),
            session: AnalysisSession::new(engine),
            phase: CyclePhase::Idle,
            config_dirty: false,
            leftovers: BTreeSet::new(),
            fs,
            project,
            store,
            detector,
        })
    }

    /// Replaces the output sink.
    pub fn with_sink(mut self, sink: Box<dyn OutputSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Replaces the progress observer.
    pub fn with_observer(mut self, observer: Box<dyn BuildObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Current phase.
    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    /// The resolved project.
    pub fn project(&self) -> &ResolvedProject {
        &self.project
    }

    /// The analysis session.
    pub fn session(&self) -> &AnalysisSession<E> {
        &self.session
    }

    /// The build-state store.
    pub fn store(&self) -> &BuildStateStore {
        &self.store
    }

    /// Makes the next cycle reload the project descriptor first.
    pub fn request_config_reload(&mut self) {
        self.config_dirty = true;
    }

    fn enter(&mut self, phase: CyclePhase) {
        self.phase = phase;
        self.observer.phase_changed(phase);
    }

    fn reload_config(&mut self) -> Result<(), ConfigError> {
        let project = load_project(
            self.session.engine(),
            self.fs.as_ref(),
            &self.project.project_dir,
        )?;
        self.config_dirty = false;
        if project == self.project {
            return Ok(());
        }
        tracing::info!("configuration changed, starting over");
        if project.state_path != self.project.state_path {
            self.collect_leftovers();
        }
        self.options = project.config.options_fingerprint();
        self.store = BuildStateStore::new(Arc::clone(&self.fs), &project.state_path, TOOL_VERSION);
        self.project = project;
        self.session.reset();
        Ok(())
    }

    /// Remembers the outputs recorded in the stored snapshot, whatever tool
    /// or options wrote it, so the next emit can prune them.
    fn collect_leftovers(&mut self) {
        if let Ok(stale) = self.store.read_snapshot() {
            self.leftovers
                .extend(stale.owned_outputs().map(std::path::Path::to_path_buf));
        }
    }

    /// Runs one complete cycle.
    ///
    /// Never fails: fatal problems are reported as diagnostics in an aborted
    /// report and leave the previous snapshot and program in place.
    pub fn run_cycle(&mut self) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport::default();
        let diagnostics = DiagnosticSink::new();

        if self.phase == CyclePhase::Stopped {
            report.aborted = true;
            return report;
        }

        if self.config_dirty {
            if let Err(e) = self.reload_config() {
                tracing::error!("configuration error: {e}");
                diagnostics.emit(Diagnostic::error(CONFIG_INVALID, e.to_string()));
                report.aborted = true;
                return self.finish(report, diagnostics, started);
            }
        }

        self.enter(CyclePhase::Detecting);
        let prior = self.store.load(self.options);
        if prior.is_none() {
            self.collect_leftovers();
        }
        let candidates = ChangeDetector::candidates(&self.project.roots, prior.as_ref());
        let mut changes = self.detector.detect(&candidates, prior.as_ref());

        self.enter(CyclePhase::Analyzing);
        let analysis = match self
            .session
            .update(&self.project, &changes, self.fs.as_ref())
        {
            Ok(analysis) => analysis,
            Err(e) => {
                tracing::error!("analysis aborted: {e}");
                let code = match e {
                    AnalysisError::Config(_) => CONFIG_INVALID,
                    AnalysisError::Engine { .. } => ANALYSIS_ABORTED,
                };
                diagnostics.emit(Diagnostic::error(code, e.to_string()));
                report.full_rebuild = changes.full_rebuild;
                report.aborted = true;
                return self.finish(report, diagnostics, started);
            }
        };
        self.detector
            .refine(&mut changes, &analysis.units, prior.as_ref());
        report.full_rebuild = changes.full_rebuild;
        report.added = changes.added.len();
        report.modified = changes.modified.len();
        report.removed_units = changes.removed.len();
        report.affected = changes.affected.len();

        diagnostics.extend(analysis.diagnostics);

        self.enter(CyclePhase::Emitting);
        let emit = EmitSequencer::new(&changes, prior.as_ref())
            .with_leftovers(std::mem::take(&mut self.leftovers))
            .emit(
            &analysis.plan,
            self.sink.as_ref(),
            self.observer.as_ref(),
        );

        self.enter(CyclePhase::Persisting);
        let snapshot = self.next_snapshot(&changes, &analysis.units, &emit);
        diagnostics.extend(emit.diagnostics);
        match self.store.persist(&snapshot) {
            Ok(outcome) => report.persist = Some(outcome),
            Err(e) => {
                tracing::error!("build state not saved: {e}");
                diagnostics.emit(
                    Diagnostic::error(PERSIST_FAILED, format!("failed to save build state: {e}"))
                        .with_note("the next build repeats this cycle's work"),
                );
            }
        }

        report.emitted = emit.emitted;
        report.skipped = emit.skipped;
        report.carried = emit.carried;
        report.failed = emit.failed;
        report.removed = emit.removed;
        self.finish(report, diagnostics, started)
    }

    fn finish(
        &mut self,
        mut report: CycleReport,
        diagnostics: DiagnosticSink,
        started: Instant,
    ) -> CycleReport {
        report.duration = started.elapsed();
        if diagnostics.error_count() > 0 {
            tracing::debug!(errors = diagnostics.error_count(), "cycle reported errors");
        }
        report.diagnostics = diagnostics.take_sorted();
        self.enter(CyclePhase::Idle);
        self.observer.cycle_finished(&report);
        report
    }

    /// Builds the snapshot describing the state this cycle leaves on disk.
    fn next_snapshot(
        &self,
        changes: &ChangeSet,
        live: &BTreeMap<PathBuf, BTreeSet<PathBuf>>,
        emit: &EmitResult,
    ) -> BuildSnapshot {
        let mut next = BuildSnapshot::new(TOOL_VERSION, self.options);
        for (unit, dependencies) in live {
            let Some(fingerprint) = changes.fingerprints.get(unit) else {
                continue;
            };
            next.units.insert(
                unit.clone(),
                UnitRecord {
                    fingerprint: *fingerprint,
                    dependencies: dependencies.clone(),
                    artifacts: BTreeSet::new(),
                },
            );
        }
        for (path, record) in &emit.records {
            let mut record = record.clone();
            record.sources.retain(|s| next.units.contains_key(s));
            if !record.sources.is_empty() {
                next.link_artifact(path.clone(), record);
            }
        }
        next.incomplete = emit
            .incomplete
            .iter()
            .filter(|u| next.units.contains_key(*u))
            .cloned()
            .collect();
        next.pending_removals = emit.pending_removals.clone();
        next
    }

    /// Turns raw file-system events into a trigger.
    ///
    /// Events inside the output directory (which includes the build-state
    /// file) are dropped so the driver's own writes never retrigger it.
    pub fn classify_events(&self, events: &[FsEvent]) -> Trigger {
        let config_path = self.project.project_dir.join(CONFIG_FILE);
        let mut trigger = Trigger::default();
        for event in events {
            if event.path == config_path {
                trigger.config_changed = true;
            } else if self.project.is_output(&event.path) {
                continue;
            } else if self.project.logical(&event.path).is_some() {
                trigger.paths.insert(event.path.clone());
            }
        }
        trigger
    }

    fn absorb(&self, pending: &mut Option<Trigger>, events: &[FsEvent]) {
        let trigger = self.classify_events(events);
        if trigger.is_empty() {
            return;
        }
        pending.get_or_insert_with(Trigger::default).merge(trigger);
    }

    /// Folds queued messages into `pending`. With a `quiet` period, waits
    /// until no message arrives for that long; otherwise only drains.
    fn pump(
        &self,
        messages: &Receiver<WatchMessage>,
        pending: &mut Option<Trigger>,
        quiet: Option<Duration>,
    ) -> Flow {
        loop {
            let next = match quiet {
                Some(wait) => messages
                    .recv_timeout(wait)
                    .map_err(|e| e == RecvTimeoutError::Disconnected),
                None => messages
                    .try_recv()
                    .map_err(|e| e == TryRecvError::Disconnected),
            };
            match next {
                Ok(WatchMessage::Events(events)) => self.absorb(pending, &events),
                Ok(WatchMessage::Stop) => return Flow::Stop,
                Err(true) => return Flow::Closed,
                Err(false) => return Flow::Open,
            }
        }
    }

    /// Runs an initial cycle, then one cycle per coalesced trigger until a
    /// stop message arrives or every sender is gone.
    ///
    /// Messages that arrive while a cycle runs queue up and coalesce into a
    /// single pending trigger. A stop message discards the pending trigger;
    /// a closed channel runs it first.
    pub fn run_watch(
        &mut self,
        messages: &Receiver<WatchMessage>,
        mut on_report: impl FnMut(&CycleReport),
    ) {
        let debounce = Duration::from_millis(self.project.config.watch.debounce_ms);
        let report = self.run_cycle();
        on_report(&report);

        let mut pending: Option<Trigger> = None;
        let mut closed = false;
        while self.phase != CyclePhase::Stopped {
            if pending.is_none() {
                if closed {
                    break;
                }
                match messages.recv() {
                    Ok(WatchMessage::Events(events)) => self.absorb(&mut pending, &events),
                    Ok(WatchMessage::Stop) | Err(_) => break,
                }
                continue;
            }

            if !closed {
                match self.pump(messages, &mut pending, Some(debounce)) {
                    Flow::Stop => break,
                    Flow::Closed => closed = true,
                    Flow::Open => {}
                }
            }

            let Some(trigger) = pending.take() else {
                continue;
            };
            if trigger.config_changed {
                self.config_dirty = true;
            }
            tracing::info!(
                paths = trigger.paths.len(),
                config = trigger.config_changed,
                "change detected, rebuilding"
            );
            let report = self.run_cycle();
            on_report(&report);
        }
        self.enter(CyclePhase::Stopped);
    }

    /// Creates a polling watcher over the project directory that ignores the
    /// output directory.
    pub fn polling_watcher(&self) -> PollingWatcher {
        PollingWatcher::new(
            &self.project.project_dir,
            vec![self.project.out_dir.clone()],
            Duration::from_millis(self.project.config.watch.poll_interval_ms),
        )
    }
}

fn load_project<E: AnalysisEngine>(
    engine: &E,
    fs: &dyn FileSystem,
    project_dir: &std::path::Path,
) -> Result<ResolvedProject, ConfigError> {
    let config = engine.parse_project_config(&project_dir.join(CONFIG_FILE), fs)?;
    ResolvedProject::resolve(project_dir, config)
}
