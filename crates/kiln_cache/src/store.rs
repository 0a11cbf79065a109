//! Atomic persistence of the build snapshot.
//!
//! The build-state file is the meta artifact of every cycle. It is framed
//! like this:
//!
//! ```text
//! [u32 LE header length][bincode header][JSON snapshot payload]
//! ```
//!
//! The header carries magic bytes, a format version, the tool version, and a
//! checksum of the payload, so a truncated or hand-edited file is detected
//! and treated as a cache miss.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiln_common::{ContentHash, FileSystem};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::snapshot::BuildSnapshot;

/// Magic bytes identifying a Kiln build-state file.
const STATE_MAGIC: [u8; 4] = *b"KILN";

/// Current build-state format version. Increment on breaking changes to
/// the header or payload format.
const STATE_FORMAT_VERSION: u32 = 1;

/// Suffix of the scratch file written before the atomic rename.
const TEMP_SUFFIX: &str = "tmp";

/// Header prepended to the build-state payload for validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StateHeader {
    /// Magic bytes: must be `b"KILN"`.
    magic: [u8; 4],

    /// Build-state format version.
    format_version: u32,

    /// Kiln version that wrote the file.
    tool_version: String,

    /// Content hash of the payload.
    checksum: ContentHash,
}

/// Result of a [`BuildStateStore::persist`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// A new build-state file was written and swapped in.
    Written {
        /// Size of the file in bytes.
        bytes: u64,
    },
    /// The stored file already held exactly this snapshot; nothing was written.
    Unchanged,
}

/// Exclusive owner of the persisted [`BuildSnapshot`].
///
/// [`persist`](Self::persist) is the only mutator. It writes a scratch file
/// next to the target and renames it into place, so a crash at any point
/// leaves either the old or the new snapshot, never a partial one.
pub struct BuildStateStore {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
    tool_version: String,
}

impl BuildStateStore {
    /// Creates a store for the build-state file at `path`.
    pub fn new(fs: Arc<dyn FileSystem>, path: impl Into<PathBuf>, tool_version: &str) -> Self {
        Self {
            fs,
            path: path.into(),
            tool_version: tool_version.to_string(),
        }
    }

    /// Path of the build-state file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".");
        name.push(TEMP_SUFFIX);
        PathBuf::from(name)
    }

    /// Loads the previous snapshot, returning `None` on any problem.
    ///
    /// A missing file is a silent miss. A corrupt, inconsistent, or
    /// incompatible file is logged and also treated as a miss, which forces a
    /// full rebuild.
    pub fn load(&self, options_fingerprint: ContentHash) -> Option<BuildSnapshot> {
        match self.read_snapshot() {
            Ok(snapshot) => {
                if let Err(e) = snapshot
                    .check_compatible(&self.tool_version, options_fingerprint)
                    .and_then(|()| snapshot.check_consistent())
                {
                    tracing::info!(path = %self.path.display(), "discarding build state: {e}");
                    return None;
                }
                Some(snapshot)
            }
            Err(CacheError::Fs(e)) if e.is_not_found() => {
                tracing::debug!(path = %self.path.display(), "no previous build state");
                None
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "unreadable build state: {e}");
                None
            }
        }
    }

    /// Reads and decodes the build-state file, reporting exactly what is wrong.
    pub fn read_snapshot(&self) -> Result<BuildSnapshot, CacheError> {
        let raw = self.fs.read(&self.path)?;
        decode(&self.path, &raw)
    }

    /// Atomically replaces the stored snapshot.
    ///
    /// Skips the write when the stored bytes are already identical.
    pub fn persist(&self, snapshot: &BuildSnapshot) -> Result<PersistOutcome, CacheError> {
        let encoded = encode(snapshot, &self.tool_version)?;

        if let Ok(existing) = self.fs.read(&self.path) {
            if existing == encoded {
                tracing::debug!(path = %self.path.display(), "build state unchanged");
                return Ok(PersistOutcome::Unchanged);
            }
        }

        let temp = self.temp_path();
        self.fs.write(&temp, &encoded)?;
        if let Err(e) = self.fs.rename(&temp, &self.path) {
            let _ = self.fs.remove(&temp);
            return Err(e.into());
        }

        tracing::debug!(
            path = %self.path.display(),
            bytes = encoded.len(),
            units = snapshot.units.len(),
            artifacts = snapshot.artifacts.len(),
            "build state persisted"
        );
        Ok(PersistOutcome::Written {
            bytes: encoded.len() as u64,
        })
    }
}

/// Serializes a snapshot into the framed on-disk format.
fn encode(snapshot: &BuildSnapshot, tool_version: &str) -> Result<Vec<u8>, CacheError> {
    let payload = serde_json::to_vec_pretty(snapshot).map_err(|e| CacheError::Serialization {
        reason: e.to_string(),
    })?;

    let header = StateHeader {
        magic: STATE_MAGIC,
        format_version: STATE_FORMAT_VERSION,
        tool_version: tool_version.to_string(),
        checksum: ContentHash::from_bytes(&payload),
    };

    let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())
        .map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;

    let header_len = header_bytes.len() as u32;
    let mut output = Vec::with_capacity(4 + header_bytes.len() + payload.len());
    output.extend_from_slice(&header_len.to_le_bytes());
    output.extend_from_slice(&header_bytes);
    output.extend_from_slice(&payload);
    Ok(output)
}

/// Validates the frame and decodes the snapshot payload.
fn decode(path: &Path, raw: &[u8]) -> Result<BuildSnapshot, CacheError> {
    let invalid = |reason: &str| CacheError::InvalidHeader {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    if raw.len() < 4 {
        return Err(invalid("file shorter than header length prefix"));
    }
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&raw[..4]);
    let header_len = u32::from_le_bytes(len_bytes) as usize;
    if raw.len() < 4 + header_len {
        return Err(invalid("truncated header"));
    }

    let (header, _): (StateHeader, usize) =
        bincode::serde::decode_from_slice(&raw[4..4 + header_len], bincode::config::standard())
            .map_err(|e| invalid(&e.to_string()))?;

    if header.magic != STATE_MAGIC {
        return Err(invalid("bad magic bytes"));
    }
    if header.format_version != STATE_FORMAT_VERSION {
        return Err(CacheError::VersionMismatch {
            path: path.to_path_buf(),
            expected: STATE_FORMAT_VERSION,
            actual: header.format_version,
        });
    }

    let payload = &raw[4 + header_len..];
    let actual = ContentHash::from_bytes(payload);
    if actual != header.checksum {
        return Err(CacheError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: header.checksum.to_string(),
            actual: actual.to_string(),
        });
    }

    serde_json::from_slice(payload).map_err(|e| CacheError::Serialization {
        reason: e.to_string(),
    })
}
