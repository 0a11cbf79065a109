//! Diagnostic creation, severity management, ordering, and rendering.
//!
//! This crate provides structured [`Diagnostic`] messages with severity levels,
//! codes, and optional source locations. The thread-safe [`DiagnosticSink`]
//! accumulates diagnostics during a build cycle, [`sort_diagnostics`] puts them
//! in the stable order every cycle reports them in, and [`DiagnosticRenderer`]
//! implementations format them for the terminal.

#![warn(missing_docs)]

pub mod code;
pub mod diagnostic;
pub mod location;
pub mod order;
pub mod renderer;
pub mod severity;
pub mod sink;

pub use code::{Category, DiagnosticCode};
pub use diagnostic::Diagnostic;
pub use location::Location;
pub use order::sort_diagnostics;
pub use renderer::{write_diagnostics, DiagnosticRenderer, TerminalRenderer};
pub use severity::Severity;
pub use sink::DiagnosticSink;
