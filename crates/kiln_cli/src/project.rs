//! Opening the project a command operates on.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiln_build::{SessionDriver, TextEngine};
use kiln_common::OsFileSystem;
use kiln_config::find_project_root;

use crate::GlobalArgs;

/// Finds the project directory.
///
/// An explicit `--config` naming a file selects its parent directory; naming
/// a directory selects that directory. Otherwise the nearest ancestor of the
/// working directory that holds a `kiln.toml` is used.
pub fn resolve_project_root(global: &GlobalArgs) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let cwd = std::env::current_dir()?;
    match global.config {
        Some(ref config_path) => Ok(absolute(&cwd, Path::new(config_path))),
        None => Ok(find_project_root(&cwd)?),
    }
}

fn absolute(cwd: &Path, path: &Path) -> PathBuf {
    let path = cwd.join(path);
    if path.is_file() {
        path.parent().map(Path::to_path_buf).unwrap_or(path)
    } else {
        path
    }
}

/// Opens a session driver over the project on disk with the reference engine.
pub fn open(global: &GlobalArgs) -> Result<SessionDriver<TextEngine>, Box<dyn std::error::Error>> {
    let project_dir = resolve_project_root(global)?;
    let driver = SessionDriver::new(TextEngine::new(), Arc::new(OsFileSystem), project_dir)?;
    Ok(driver)
}
