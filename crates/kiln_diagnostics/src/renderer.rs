//! Diagnostic rendering for the terminal.

use crate::diagnostic::Diagnostic;
use std::io::{self, Write};

/// Trait for rendering diagnostics into formatted output strings.
pub trait DiagnosticRenderer {
    /// Renders a single diagnostic into a formatted string.
    fn render(&self, diag: &Diagnostic) -> String;
}

/// Renders diagnostics in a rustc-style terminal format.
///
/// Produces output like:
/// ```text
/// error[A101]: unresolved import "a.kl"
///   --> src/b.kl:1:9
///    = note: ...
///    = help: ...
/// ```
pub struct TerminalRenderer {
    /// Whether to use ANSI color codes in output.
    pub color: bool,
}

impl TerminalRenderer {
    /// Creates a new terminal renderer.
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    fn paint_severity(&self, diag: &Diagnostic) -> String {
        if !self.color {
            return diag.severity.to_string();
        }
        let ansi = match diag.severity {
            crate::Severity::Error => "31",
            crate::Severity::Warning => "33",
            crate::Severity::Suggestion => "36",
            crate::Severity::Info => "34",
        };
        format!("\x1b[1;{ansi}m{}\x1b[0m", diag.severity)
    }
}

impl DiagnosticRenderer for TerminalRenderer {
    fn render(&self, diag: &Diagnostic) -> String {
        let mut out = String::new();

        out.push_str(&format!(
            "{}[{}]: {}\n",
            self.paint_severity(diag),
            diag.code,
            diag.message
        ));

        if let Some(location) = &diag.location {
            out.push_str(&format!("  --> {location}\n"));
        }

        for note in &diag.notes {
            out.push_str(&format!("   = note: {note}\n"));
        }

        for help in &diag.help {
            out.push_str(&format!("   = help: {help}\n"));
        }

        out
    }
}

/// Writes rendered diagnostics, routing errors to `errors` and every other
/// severity to `info`.
pub fn write_diagnostics<R: DiagnosticRenderer + ?Sized>(
    renderer: &R,
    diagnostics: &[Diagnostic],
    info: &mut dyn Write,
    errors: &mut dyn Write,
) -> io::Result<()> {
    for diag in diagnostics {
        let text = renderer.render(diag);
        if diag.severity.is_error() {
            errors.write_all(text.as_bytes())?;
        } else {
            info.write_all(text.as_bytes())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::{Category, DiagnosticCode};
    use crate::location::Location;

    #[test]
    fn render_error_with_location() {
        let code = DiagnosticCode::new(Category::Analysis, 101);
        let diag = Diagnostic::error(code, "unresolved import \"a.kl\"")
            .with_location(Location::new("src/b.kl", 1, 9));

        let output = TerminalRenderer::new(false).render(&diag);

        assert!(output.contains("error[A101]: unresolved import \"a.kl\""));
        assert!(output.contains("--> src/b.kl:1:9"));
    }

    #[test]
    fn render_warning_with_notes() {
        let code = DiagnosticCode::new(Category::Analysis, 201);
        let diag = Diagnostic::warning(code, "deprecated directive")
            .with_note("@include is an alias of @import")
            .with_help("use @import");

        let output = TerminalRenderer::new(false).render(&diag);

        assert!(output.contains("warning[A201]: deprecated directive"));
        assert!(output.contains("= note: @include is an alias of @import"));
        assert!(output.contains("= help: use @import"));
        assert!(!output.contains("-->"));
    }

    #[test]
    fn colored_output_wraps_severity() {
        let code = DiagnosticCode::new(Category::Config, 1);
        let output = TerminalRenderer::new(true).render(&Diagnostic::error(code, "bad"));
        assert!(output.starts_with("\x1b[1;31merror\x1b[0m[C001]"));
    }

    #[test]
    fn errors_and_info_are_routed_separately() {
        let code = DiagnosticCode::new(Category::Analysis, 1);
        let diags = vec![
            Diagnostic::error(code, "broken"),
            Diagnostic::warning(code, "odd"),
            Diagnostic::info(code, "fyi"),
        ];
        let mut info = Vec::new();
        let mut errors = Vec::new();
        write_diagnostics(&TerminalRenderer::new(false), &diags, &mut info, &mut errors).unwrap();

        let info = String::from_utf8(info).unwrap();
        let errors = String::from_utf8(errors).unwrap();
        assert!(errors.contains("broken"));
        assert!(!errors.contains("odd"));
        assert!(info.contains("odd"));
        assert!(info.contains("fyi"));
        assert!(!info.contains("broken"));
    }
}
