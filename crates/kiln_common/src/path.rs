//! Lexical normalization of logical unit paths.

use std::path::{Component, Path, PathBuf};

/// Lexically normalizes a project-relative path.
///
/// Removes `.` components and folds `..` into its parent. Returns `None` for
/// absolute paths and for paths that climb above the project root, neither of
/// which can name an Input Unit.
pub fn normalize(path: &Path) -> Option<PathBuf> {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::Normal(part) => parts.push(part),
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.iter().collect())
}

/// Resolves `target` relative to the directory containing `from`.
pub fn resolve_relative(from: &Path, target: &Path) -> Option<PathBuf> {
    let base = from.parent().unwrap_or_else(|| Path::new(""));
    normalize(&base.join(target))
}
