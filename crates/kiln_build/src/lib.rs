//! The incremental build orchestrator.
//!
//! One build cycle runs detect → analyze → emit → persist:
//!
//! 1. The [`ChangeDetector`](kiln_cache::ChangeDetector) compares current
//!    fingerprints against the last [`BuildSnapshot`](kiln_cache::BuildSnapshot).
//! 2. The [`AnalysisSession`] hands the change set and the previous program to
//!    an [`AnalysisEngine`] and collects the complete, ordered diagnostics.
//! 3. The [`EmitSequencer`] writes only the artifacts that changed through an
//!    [`OutputSink`] and prunes orphans.
//! 4. The [`BuildStateStore`](kiln_cache::BuildStateStore) replaces the
//!    snapshot atomically, last.
//!
//! The [`SessionDriver`] owns that cycle and the watch loop around it.
//! [`TextEngine`] is a small reference engine so the orchestrator can be used
//! without an external analysis backend.

#![warn(missing_docs)]

pub mod driver;
pub mod emit;
pub mod engine;
pub mod observer;
pub mod session;
pub mod text;
pub mod watch;

pub use driver::{CyclePhase, CycleReport, DriverError, SessionDriver};
pub use emit::{EmitResult, EmitSequencer, FsSink, OutputSink, SinkError};
pub use engine::{AnalysisEngine, AnalysisError, PlannedArtifact};
pub use observer::{BuildObserver, NullObserver, TracingObserver};
pub use session::{Analysis, AnalysisSession};
pub use text::TextEngine;
pub use watch::{FsEvent, FsEventKind, PollingWatcher, Trigger, WatchMessage, Watcher};
