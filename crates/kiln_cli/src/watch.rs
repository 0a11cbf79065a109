//! `kiln watch`: rebuild on every change until enter is pressed.

use std::io::BufRead;
use std::sync::mpsc::{self, Sender};
use std::thread;

use kiln_build::{WatchMessage, Watcher};

use crate::project;
use crate::report::print_to_console;
use crate::GlobalArgs;

/// Runs the watch loop. Always exits 0 once stopped; per-cycle failures are
/// reported and the loop carries on.
pub fn run(global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let mut driver = project::open(global)?;
    let (tx, rx) = mpsc::channel();

    let mut watcher = driver.polling_watcher();
    watcher.watch(tx.clone())?;
    spawn_stdin_stop(tx)?;

    if !global.quiet {
        println!(
            "Watching {} for changes. Press enter to exit.",
            driver.project().project_dir.display()
        );
    }
    driver.run_watch(&rx, |report| print_to_console(report, global));
    watcher.stop();
    Ok(0)
}

/// Sends a stop message when a line is read from stdin. End of input does
/// not stop the loop; the watcher keeps its own sender.
fn spawn_stdin_stop(tx: Sender<WatchMessage>) -> std::io::Result<()> {
    thread::Builder::new()
        .name("kiln-stdin".to_string())
        .spawn(move || {
            let mut line = String::new();
            if let Ok(n) = std::io::stdin().lock().read_line(&mut line) {
                if n > 0 {
                    let _ = tx.send(WatchMessage::Stop);
                }
            }
        })?;
    Ok(())
}
