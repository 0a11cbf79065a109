//! Per-cycle diagnostic collection.

use crate::diagnostic::Diagnostic;
use crate::order::sort_diagnostics;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Collects the diagnostics of one build cycle from every stage that
/// produces them.
///
/// Stages can report through a shared reference, including from other
/// threads. Arrival order is preserved; use [`take_sorted`](Self::take_sorted)
/// for reporting order instead.
#[derive(Default)]
pub struct DiagnosticSink {
    collected: Mutex<Vec<Diagnostic>>,
    errors: AtomicUsize,
}

impl DiagnosticSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Diagnostic>> {
        self.collected.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Records one diagnostic.
    pub fn emit(&self, diag: Diagnostic) {
        if diag.severity.is_error() {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        self.lock().push(diag);
    }

    /// Records a batch, keeping its order.
    pub fn extend(&self, diags: impl IntoIterator<Item = Diagnostic>) {
        let mut collected = self.lock();
        for diag in diags {
            if diag.severity.is_error() {
                self.errors.fetch_add(1, Ordering::Relaxed);
            }
            collected.push(diag);
        }
    }

    /// Errors recorded since creation. Draining does not reset the count.
    pub fn error_count(&self) -> usize {
        self.errors.load(Ordering::Relaxed)
    }

    /// Number of diagnostics currently held.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if nothing is held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains everything in arrival order.
    pub fn take_all(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.lock())
    }

    /// Drains everything in reporting order.
    pub fn take_sorted(&self) -> Vec<Diagnostic> {
        let mut all = self.take_all();
        sort_diagnostics(&mut all);
        all
    }
}
