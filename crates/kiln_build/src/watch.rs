//! File-system change notification and trigger coalescing.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use walkdir::WalkDir;

use crate::driver::DriverError;

/// What happened to a watched path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FsEventKind {
    /// The path appeared.
    Created,
    /// The path's contents or metadata changed.
    Modified,
    /// The path disappeared.
    Deleted,
}

/// A single file-system change.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FsEvent {
    /// What happened.
    pub kind: FsEventKind,
    /// Absolute path of the changed file.
    pub path: PathBuf,
}

impl FsEvent {
    /// Creates an event.
    pub fn new(kind: FsEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// Messages delivered to the watch loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchMessage {
    /// A batch of file-system events.
    Events(Vec<FsEvent>),
    /// Stop after the current cycle.
    Stop,
}

/// A coalesced request to run a cycle.
///
/// Any number of event batches merge into one trigger; the watch loop keeps
/// at most one pending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trigger {
    /// Changed input paths, absolute.
    pub paths: BTreeSet<PathBuf>,
    /// The project descriptor changed.
    pub config_changed: bool,
}

impl Trigger {
    /// Folds another trigger into this one.
    pub fn merge(&mut self, other: Trigger) {
        self.paths.extend(other.paths);
        self.config_changed |= other.config_changed;
    }

    /// Returns `true` if the trigger carries nothing to rebuild for.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty() && !self.config_changed
    }
}

/// Delivers file-system events to the watch loop.
pub trait Watcher {
    /// Starts watching and sends batches on `sender` until stopped or the
    /// receiving side goes away.
    fn watch(&mut self, sender: Sender<WatchMessage>) -> Result<(), DriverError>;

    /// Stops delivering events.
    fn stop(&mut self) {}
}

/// Metadata the poller compares between scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    modified: Option<SystemTime>,
    len: u64,
}

/// Path → stamp for every file below a root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollState {
    files: BTreeMap<PathBuf, Stamp>,
}

impl PollState {
    /// Scans every file below `root`, skipping anything under `ignore`.
    pub fn scan(root: &Path, ignore: &[PathBuf]) -> Self {
        let mut files = BTreeMap::new();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !ignore.iter().any(|i| e.path().starts_with(i)));
        for entry in walker.filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            files.insert(
                entry.into_path(),
                Stamp {
                    modified: meta.modified().ok(),
                    len: meta.len(),
                },
            );
        }
        Self { files }
    }

    /// Number of files seen.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns `true` if no files were seen.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Lists the events that turn `self` into `next`, ordered by path.
    pub fn diff(&self, next: &PollState) -> Vec<FsEvent> {
        let mut events = Vec::new();
        for (path, stamp) in &next.files {
            match self.files.get(path) {
                None => events.push(FsEvent::new(FsEventKind::Created, path)),
                Some(old) if old != stamp => {
                    events.push(FsEvent::new(FsEventKind::Modified, path))
                }
                Some(_) => {}
            }
        }
        for path in self.files.keys() {
            if !next.files.contains_key(path) {
                events.push(FsEvent::new(FsEventKind::Deleted, path));
            }
        }
        events.sort_by(|a, b| a.path.cmp(&b.path));
        events
    }
}

/// [`Watcher`] that rescans the project tree at a fixed interval.
///
/// Compares modification time and size, so it works on any file system at
/// the cost of latency up to one interval.
pub struct PollingWatcher {
    root: PathBuf,
    ignore: Vec<PathBuf>,
    interval: Duration,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PollingWatcher {
    /// Creates a watcher over `root`. Paths under any `ignore` prefix never
    /// produce events.
    pub fn new(root: impl Into<PathBuf>, ignore: Vec<PathBuf>, interval: Duration) -> Self {
        Self {
            root: root.into(),
            ignore,
            interval,
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }
}

impl Watcher for PollingWatcher {
    fn watch(&mut self, sender: Sender<WatchMessage>) -> Result<(), DriverError> {
        if self.handle.is_some() {
            return Err(DriverError::Watch {
                reason: "watcher already running".to_string(),
            });
        }
        if !self.root.is_dir() {
            return Err(DriverError::Watch {
                reason: format!("{} is not a directory", self.root.display()),
            });
        }

        let root = self.root.clone();
        let ignore = self.ignore.clone();
        let interval = self.interval;
        let stop = Arc::clone(&self.stop);
        stop.store(false, Ordering::SeqCst);

        // Baseline before returning, so changes made right after `watch` are seen.
        let mut state = PollState::scan(&root, &ignore);
        tracing::debug!(root = %root.display(), files = state.len(), "polling started");

        let handle = thread::Builder::new()
            .name("kiln-poll".to_string())
            .spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    thread::sleep(interval);
                    let next = PollState::scan(&root, &ignore);
                    let events = state.diff(&next);
                    state = next;
                    if events.is_empty() {
                        continue;
                    }
                    if sender.send(WatchMessage::Events(events)).is_err() {
                        break;
                    }
                }
                tracing::debug!("polling stopped");
            })
            .map_err(|e| DriverError::Watch {
                reason: format!("cannot spawn poller: {e}"),
            })?;
        self.handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PollingWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
