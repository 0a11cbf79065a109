//! The persisted record of the last completed build cycle.
//!
//! A snapshot maps every tracked Input Unit to its fingerprint, dependency
//! edges, and produced artifacts, and every Output Artifact to its content
//! hash and producing units. All collections are ordered, so serializing the
//! same logical snapshot always yields the same bytes.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use kiln_common::ContentHash;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Top-level build snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSnapshot {
    /// Kiln version that produced this snapshot. Invalidate on version change.
    pub tool_version: String,

    /// Fingerprint of the build options. Invalidate on options change.
    pub options_fingerprint: ContentHash,

    /// Per-unit state, keyed by logical path.
    pub units: BTreeMap<PathBuf, UnitRecord>,

    /// Per-artifact state, keyed by absolute target path.
    pub artifacts: BTreeMap<PathBuf, ArtifactRecord>,

    /// Units whose artifacts failed to write; treated as modified next cycle.
    #[serde(default)]
    pub incomplete: BTreeSet<PathBuf>,

    /// Stale artifacts whose deletion failed; removal is retried next cycle.
    #[serde(default)]
    pub pending_removals: BTreeSet<PathBuf>,
}

/// Recorded state of a single Input Unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRecord {
    /// Content hash of the unit when it was last analyzed.
    pub fingerprint: ContentHash,

    /// Units this unit references.
    #[serde(default)]
    pub dependencies: BTreeSet<PathBuf>,

    /// Artifacts this unit contributed to.
    #[serde(default)]
    pub artifacts: BTreeSet<PathBuf>,
}

/// What an Output Artifact contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Compiled output.
    Output,
    /// Line map for an output.
    SourceMap,
}

/// Recorded state of a single Output Artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Hash of the bytes last written (or confirmed) at the target path.
    pub content_hash: ContentHash,

    /// Units that produced this artifact.
    pub sources: BTreeSet<PathBuf>,

    /// What the artifact contains.
    pub kind: ArtifactKind,

    /// Size in bytes.
    pub size: u64,
}

impl BuildSnapshot {
    /// Creates an empty snapshot for the given tool version and options.
    pub fn new(tool_version: &str, options_fingerprint: ContentHash) -> Self {
        Self {
            tool_version: tool_version.to_string(),
            options_fingerprint,
            units: BTreeMap::new(),
            artifacts: BTreeMap::new(),
            incomplete: BTreeSet::new(),
            pending_removals: BTreeSet::new(),
        }
    }

    /// Checks that this snapshot was produced with the same version and options.
    pub fn check_compatible(
        &self,
        tool_version: &str,
        options_fingerprint: ContentHash,
    ) -> Result<(), CacheError> {
        if self.tool_version != tool_version {
            return Err(CacheError::Incompatible {
                reason: format!("tool version {} != {tool_version}", self.tool_version),
            });
        }
        if self.options_fingerprint != options_fingerprint {
            return Err(CacheError::Incompatible {
                reason: "build options changed".to_string(),
            });
        }
        Ok(())
    }

    /// Checks the traceability invariant.
    ///
    /// Every artifact must name at least one producing unit, every producing
    /// unit must be present, and unit-to-artifact links must agree in both
    /// directions. Incomplete units must be tracked units.
    pub fn check_consistent(&self) -> Result<(), CacheError> {
        for (path, artifact) in &self.artifacts {
            if artifact.sources.is_empty() {
                return Err(inconsistent(format!(
                    "artifact {} has no producing unit",
                    path.display()
                )));
            }
            for source in &artifact.sources {
                let unit = self.units.get(source).ok_or_else(|| {
                    inconsistent(format!(
                        "artifact {} traces to untracked unit {}",
                        path.display(),
                        source.display()
                    ))
                })?;
                if !unit.artifacts.contains(path) {
                    return Err(inconsistent(format!(
                        "unit {} does not list artifact {}",
                        source.display(),
                        path.display()
                    )));
                }
            }
        }
        for (path, unit) in &self.units {
            for artifact in &unit.artifacts {
                let record = self.artifacts.get(artifact).ok_or_else(|| {
                    inconsistent(format!(
                        "unit {} lists unknown artifact {}",
                        path.display(),
                        artifact.display()
                    ))
                })?;
                if !record.sources.contains(path) {
                    return Err(inconsistent(format!(
                        "artifact {} does not list unit {}",
                        artifact.display(),
                        path.display()
                    )));
                }
            }
        }
        if let Some(stray) = self.incomplete.iter().find(|p| !self.units.contains_key(*p)) {
            return Err(inconsistent(format!(
                "incomplete unit {} is not tracked",
                stray.display()
            )));
        }
        Ok(())
    }

    /// Returns the recorded fingerprint of a unit.
    pub fn fingerprint(&self, path: &Path) -> Option<ContentHash> {
        self.units.get(path).map(|u| u.fingerprint)
    }

    /// Returns `true` if the previous cycle failed to write some of this unit's artifacts.
    pub fn is_incomplete(&self, path: &Path) -> bool {
        self.incomplete.contains(path)
    }

    /// Every output path this snapshot is responsible for: recorded
    /// artifacts plus stale ones still awaiting removal.
    pub fn owned_outputs(&self) -> impl Iterator<Item = &Path> {
        self.artifacts
            .keys()
            .chain(self.pending_removals.iter())
            .map(PathBuf::as_path)
    }

    /// Iterates the recorded dependency edges as `(unit, dependency)` pairs.
    pub fn edges(&self) -> impl Iterator<Item = (&Path, &Path)> {
        self.units.iter().flat_map(|(unit, record)| {
            record
                .dependencies
                .iter()
                .map(move |dep| (unit.as_path(), dep.as_path()))
        })
    }

    /// Records an artifact and links it to each of its sources.
    ///
    /// Sources must already be present in `units`; unknown sources are skipped.
    pub fn link_artifact(&mut self, path: PathBuf, record: ArtifactRecord) {
        for source in &record.sources {
            if let Some(unit) = self.units.get_mut(source) {
                unit.artifacts.insert(path.clone());
            }
        }
        self.artifacts.insert(path, record);
    }
}

fn inconsistent(reason: String) -> CacheError {
    CacheError::Inconsistent { reason }
}
