//! Printing cycle reports.

use std::io::{self, Write};

use kiln_build::CycleReport;
use kiln_diagnostics::{write_diagnostics, TerminalRenderer};

use crate::GlobalArgs;

/// Prints a cycle's diagnostics and summary.
///
/// Error diagnostics go to `errors`, everything else to `info`. In quiet mode
/// only errors are printed.
pub fn print_report(
    report: &CycleReport,
    global: &GlobalArgs,
    info: &mut dyn Write,
    errors: &mut dyn Write,
) -> io::Result<()> {
    let renderer = TerminalRenderer::new(global.color);
    if global.quiet {
        write_diagnostics(&renderer, &report.diagnostics, &mut io::sink(), errors)?;
        return Ok(());
    }
    write_diagnostics(&renderer, &report.diagnostics, info, errors)?;
    writeln!(info, "{}", report.summary())
}

/// Prints to the process's standard streams, ignoring broken pipes.
pub fn print_to_console(report: &CycleReport, global: &GlobalArgs) {
    let stdout = io::stdout();
    let stderr = io::stderr();
    let _ = print_report(report, global, &mut stdout.lock(), &mut stderr.lock());
}
