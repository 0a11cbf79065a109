//! `kiln once`: a single build cycle.

use crate::project;
use crate::report::print_to_console;
use crate::GlobalArgs;

/// Runs one cycle. Exit code 1 if it produced errors or failed writes.
pub fn run(global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let mut driver = project::open(global)?;
    let report = driver.run_cycle();
    print_to_console(&report, global);
    Ok(if report.has_errors() { 1 } else { 0 })
}
