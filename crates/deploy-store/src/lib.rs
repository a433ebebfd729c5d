//! On-disk state for deployctl: instance records, backup records, and layout.
//!
//! This crate owns everything persisted between invocations: the `StateLayout`
//! directory structure with a format-version marker, an `InstanceStore` of
//! per-instance lifecycle records, and a `BackupStore` of backup-artifact
//! metadata with a `RetentionSweeper` for age/count pruning, and the
//! advisory `StateLock` serializing invocations against one store. All
//! records are
//! JSON written atomically (tempfile + rename + directory fsync) and carry a
//! blake3 checksum that is verified on read.

pub mod backup;
pub mod instance;
pub mod layout;
pub mod lock;
pub mod retention;

pub use backup::{BackupRecord, BackupStatus, BackupStore};
pub use instance::{validate_instance_name, InstanceRecord, InstanceState, InstanceStore};
pub use layout::{StateLayout, STATE_FORMAT_VERSION};
pub use lock::StateLock;
pub use retention::{PruneReport, RetentionPolicy, RetentionSweeper};

use std::path::Path;
use thiserror::Error;

/// Fsync a directory to ensure that a preceding `rename()` is durable.
///
/// On Linux with ext4 `data=ordered` (the default), renames are usually
/// durable without an explicit dir fsync, but POSIX does not guarantee this.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("integrity check failed for record '{name}': expected {expected}, got {actual}")]
    IntegrityFailure {
        name: String,
        expected: String,
        actual: String,
    },
    #[error("instance not found: {0}")]
    InstanceNotFound(String),
    #[error("backup record not found: {0}")]
    BackupNotFound(String),
    #[error("backup record '{0}' is complete and immutable")]
    BackupImmutable(String),
    #[error("state format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid instance name: {0}")]
    InvalidName(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_instance_not_found() {
        let e = StoreError::InstanceNotFound("staging".to_owned());
        assert!(e.to_string().contains("staging"));
    }

    #[test]
    fn error_display_backup_immutable() {
        let e = StoreError::BackupImmutable("dev-2026".to_owned());
        assert!(e.to_string().contains("immutable"));
    }

    #[test]
    fn error_display_version_mismatch() {
        let e = StoreError::VersionMismatch {
            expected: 1,
            found: 9,
        };
        let msg = e.to_string();
        assert!(msg.contains('1'));
        assert!(msg.contains('9'));
    }
}
