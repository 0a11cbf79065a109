//! Structured diagnostic messages with severity, codes, and locations.

use crate::code::DiagnosticCode;
use crate::location::Location;
use crate::severity::Severity;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A structured diagnostic message.
///
/// Diagnostics are produced by the analysis engine (and by the orchestrator
/// for emit and persistence failures), are immutable once issued, and are
/// never persisted: every cycle re-derives the complete list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// The severity level of this diagnostic.
    pub severity: Severity,
    /// The code identifying the kind of diagnostic.
    pub code: DiagnosticCode,
    /// The main diagnostic message.
    pub message: String,
    /// Where the condition was detected, if it belongs to a source position.
    pub location: Option<Location>,
    /// Explanatory footnotes (e.g., "note: ...").
    pub notes: Vec<String>,
    /// Actionable suggestions (e.g., "help: ...").
    pub help: Vec<String>,
}

impl Diagnostic {
    /// Creates a diagnostic with the given severity, code, and message.
    pub fn new(severity: Severity, code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            severity,
            code,
            message: message.into(),
            location: None,
            notes: Vec::new(),
            help: Vec::new(),
        }
    }

    /// Creates a new error diagnostic.
    pub fn error(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, code, message)
    }

    /// Creates a new warning diagnostic.
    pub fn warning(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, code, message)
    }

    /// Creates a new suggestion diagnostic.
    pub fn suggestion(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(Severity::Suggestion, code, message)
    }

    /// Creates a new informational diagnostic.
    pub fn info(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, code, message)
    }

    /// Attaches a source location.
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Adds a note to this diagnostic.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Adds a help message to this diagnostic.
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help.push(help.into());
        self
    }

    /// Returns `true` if this diagnostic is located in the given unit.
    pub fn is_in(&self, path: &Path) -> bool {
        self.location.as_ref().is_some_and(|l| l.path == path)
    }
}
