//! Error types for build-state operations.

use kiln_common::FsError;
use std::path::PathBuf;

/// Errors that can occur while reading or writing build state.
///
/// Loading is fail-safe: [`BuildStateStore::load`](crate::BuildStateStore::load)
/// turns every one of these into a cache miss. They surface as hard errors
/// only from persistence and from the strict reader.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The file system rejected a read, write, or rename.
    #[error("build-state I/O error: {0}")]
    Fs(#[from] FsError),

    /// The build-state file has an invalid or missing header.
    #[error("invalid build-state header in {path}: {reason}")]
    InvalidHeader {
        /// The build-state file path.
        path: PathBuf,
        /// Description of the header problem.
        reason: String,
    },

    /// The stored checksum does not match the computed checksum of the payload.
    #[error("checksum mismatch in {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// The build-state file path.
        path: PathBuf,
        /// The expected checksum from the header.
        expected: String,
        /// The actual checksum computed from the payload.
        actual: String,
    },

    /// The build-state format version does not match the current version.
    #[error("version mismatch in {path}: expected {expected}, got {actual}")]
    VersionMismatch {
        /// The build-state file path.
        path: PathBuf,
        /// The expected format version.
        expected: u32,
        /// The actual format version found in the file.
        actual: u32,
    },

    /// The snapshot was written by another tool version or with other options.
    #[error("snapshot is stale: {reason}")]
    Incompatible {
        /// What differs.
        reason: String,
    },

    /// The snapshot violates its own traceability invariant.
    #[error("snapshot is inconsistent: {reason}")]
    Inconsistent {
        /// The first violation found.
        reason: String,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_error_display() {
        let err = CacheError::from(FsError::NotFound {
            path: PathBuf::from("/tmp/out/kiln.buildinfo"),
        });
        let msg = err.to_string();
        assert!(msg.contains("build-state I/O error"));
        assert!(msg.contains("kiln.buildinfo"));
    }

    #[test]
    fn invalid_header_display() {
        let err = CacheError::InvalidHeader {
            path: PathBuf::from("kiln.buildinfo"),
            reason: "missing magic bytes".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("invalid build-state header"));
        assert!(msg.contains("missing magic bytes"));
    }

    #[test]
    fn checksum_mismatch_display() {
        let err = CacheError::ChecksumMismatch {
            path: PathBuf::from("kiln.buildinfo"),
            expected: "aabb".to_string(),
            actual: "ccdd".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("checksum mismatch"));
        assert!(msg.contains("aabb"));
        assert!(msg.contains("ccdd"));
    }

    #[test]
    fn version_mismatch_display() {
        let err = CacheError::VersionMismatch {
            path: PathBuf::from("kiln.buildinfo"),
            expected: 2,
            actual: 1,
        };
        let msg = err.to_string();
        assert!(msg.contains("expected 2"));
        assert!(msg.contains("got 1"));
    }

    #[test]
    fn incompatible_display() {
        let err = CacheError::Incompatible {
            reason: "tool version 0.1.0 != 0.2.0".to_string(),
        };
        assert!(err.to_string().starts_with("snapshot is stale"));
    }
}
