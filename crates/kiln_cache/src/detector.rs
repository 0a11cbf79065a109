//! Input fingerprinting and change classification.
//!
//! Compares the fingerprints of the currently reachable Input Units against
//! the previous [`BuildSnapshot`] and classifies each unit as added,
//! modified, removed, or unchanged. The affected set is the changed set plus
//! every unit that transitively depends on a changed unit.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiln_common::{ContentHash, FileSystem, FsError};

use crate::graph::affected_closure;
use crate::snapshot::BuildSnapshot;

/// Per-cycle classification of Input Units.
///
/// `added`, `modified`, `removed`, and `unchanged` are pairwise disjoint.
/// `affected` always contains every changed unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Units not present in the previous snapshot.
    pub added: BTreeSet<PathBuf>,

    /// Units whose fingerprint changed, or whose outputs were left incomplete.
    pub modified: BTreeSet<PathBuf>,

    /// Units in the previous snapshot that are no longer reachable or readable.
    pub removed: BTreeSet<PathBuf>,

    /// Units whose fingerprint matches the previous snapshot.
    pub unchanged: BTreeSet<PathBuf>,

    /// Changed units plus their transitive dependents.
    pub affected: BTreeSet<PathBuf>,

    /// Current fingerprint of every present unit.
    pub fingerprints: BTreeMap<PathBuf, ContentHash>,

    /// `true` when there was no usable previous snapshot.
    pub full_rebuild: bool,
}

impl ChangeSet {
    /// Returns `true` if nothing was added, modified, or removed.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    /// Returns the total number of units that need reanalysis (added + modified).
    pub fn dirty_count(&self) -> usize {
        self.added.len() + self.modified.len()
    }

    /// Iterates all changed units (added, modified, and removed).
    pub fn changed(&self) -> impl Iterator<Item = &Path> {
        self.added
            .iter()
            .chain(&self.modified)
            .chain(&self.removed)
            .map(PathBuf::as_path)
    }

    /// Returns `true` if `path` is in the affected set.
    pub fn is_affected(&self, path: &Path) -> bool {
        self.affected.contains(path)
    }

    /// Classifies a present unit against the previous snapshot.
    fn classify(&mut self, path: PathBuf, hash: ContentHash, prior: Option<&BuildSnapshot>) {
        match prior.and_then(|p| p.fingerprint(&path).map(|fp| (p, fp))) {
            Some((p, fp)) if fp == hash && !p.is_incomplete(&path) => {
                self.unchanged.insert(path.clone());
            }
            Some(_) => {
                self.modified.insert(path.clone());
            }
            None => {
                self.added.insert(path.clone());
            }
        }
        self.fingerprints.insert(path, hash);
    }

    fn forget(&mut self, path: &Path) {
        self.added.remove(path);
        self.modified.remove(path);
        self.unchanged.remove(path);
        self.removed.remove(path);
        self.fingerprints.remove(path);
    }
}

/// Fingerprints Input Units and compares them against a previous snapshot.
///
/// Units are named by logical paths relative to `project_dir`.
pub struct ChangeDetector {
    fs: Arc<dyn FileSystem>,
    project_dir: PathBuf,
}

impl ChangeDetector {
    /// Creates a detector reading units below `project_dir`.
    pub fn new(fs: Arc<dyn FileSystem>, project_dir: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            project_dir: project_dir.into(),
        }
    }

    /// Computes the content hash of a single unit.
    pub fn fingerprint(&self, logical: &Path) -> Result<ContentHash, FsError> {
        let content = self.fs.read(&self.project_dir.join(logical))?;
        Ok(ContentHash::from_bytes(&content))
    }

    /// Returns the roots plus every unit reachable from them over the
    /// dependency edges recorded in `prior`.
    ///
    /// This is the candidate input set before analysis. Units only reachable
    /// through edges the engine has not reported yet are picked up by
    /// [`refine`](Self::refine).
    pub fn candidates(roots: &[PathBuf], prior: Option<&BuildSnapshot>) -> BTreeSet<PathBuf> {
        let mut seen: BTreeSet<PathBuf> = BTreeSet::new();
        let mut stack: Vec<PathBuf> = roots.to_vec();
        while let Some(unit) = stack.pop() {
            if !seen.insert(unit.clone()) {
                continue;
            }
            if let Some(record) = prior.and_then(|p| p.units.get(&unit)) {
                stack.extend(record.dependencies.iter().cloned());
            }
        }
        seen
    }

    /// Classifies `candidates` against `prior`.
    ///
    /// With no prior snapshot every readable candidate is added. Prior units
    /// that are not candidates, or that can no longer be read, are removed.
    /// Units the prior cycle left incomplete are modified even if their
    /// fingerprint matches.
    pub fn detect(&self, candidates: &BTreeSet<PathBuf>, prior: Option<&BuildSnapshot>) -> ChangeSet {
        let mut cs = ChangeSet {
            full_rebuild: prior.is_none(),
            ..ChangeSet::default()
        };

        for path in candidates {
            match self.fingerprint(path) {
                Ok(hash) => cs.classify(path.clone(), hash, prior),
                Err(e) => {
                    if !e.is_not_found() {
                        tracing::warn!(unit = %path.display(), "cannot fingerprint unit: {e}");
                    }
                    if prior.is_some_and(|p| p.units.contains_key(path)) {
                        cs.removed.insert(path.clone());
                    }
                }
            }
        }

        if let Some(prior) = prior {
            for path in prior.units.keys() {
                if !candidates.contains(path) {
                    cs.removed.insert(path.clone());
                }
            }
        }

        cs.affected = affected_closure(cs.changed(), prior.into_iter().flat_map(|p| p.edges()));

        tracing::debug!(
            added = cs.added.len(),
            modified = cs.modified.len(),
            removed = cs.removed.len(),
            unchanged = cs.unchanged.len(),
            affected = cs.affected.len(),
            "changes detected"
        );
        cs
    }

    /// Reconciles a change set with the units the analysis engine actually reached.
    ///
    /// `live` maps every unit in the analyzed program to its dependencies.
    /// Live units that were not fingerprinted yet are classified now; units
    /// the engine no longer reaches become removed. The affected closure is
    /// recomputed over both the prior and the live edges.
    pub fn refine(
        &self,
        cs: &mut ChangeSet,
        live: &BTreeMap<PathBuf, BTreeSet<PathBuf>>,
        prior: Option<&BuildSnapshot>,
    ) {
        for path in live.keys() {
            if cs.fingerprints.contains_key(path) {
                continue;
            }
            match self.fingerprint(path) {
                Ok(hash) => {
                    cs.forget(path);
                    cs.classify(path.clone(), hash, prior);
                }
                Err(e) => {
                    tracing::warn!(unit = %path.display(), "engine reached unreadable unit: {e}");
                }
            }
        }

        let unreached: Vec<PathBuf> = cs
            .fingerprints
            .keys()
            .filter(|p| !live.contains_key(*p))
            .cloned()
            .collect();
        for path in unreached {
            cs.forget(&path);
            if prior.is_some_and(|p| p.units.contains_key(&path)) {
                cs.removed.insert(path);
            }
        }

        let live_edges = live.iter().flat_map(|(unit, deps)| {
            deps.iter().map(move |dep| (unit.as_path(), dep.as_path()))
        });
        let prior_edges = prior.into_iter().flat_map(|p| p.edges());
        cs.affected = affected_closure(cs.changed(), prior_edges.chain(live_edges));
    }
}
