use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Current state format version. Incremented on incompatible layout changes.
pub const STATE_FORMAT_VERSION: u32 = 1;
const VERSION_FILE: &str = "version";

/// Directory layout for the deployctl state root.
///
/// Holds user profile files, instance records, backup record metadata, and
/// the backup artifact directory. Record metadata lives under `state/`,
/// separate from the artifacts themselves. Subdirectories are created on
/// [`initialize`](Self::initialize).
#[derive(Debug, Clone)]
pub struct StateLayout {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct StateVersion {
    format_version: u32,
}

impl StateLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// User-provided profile files (`<name>.toml`) shadowing built-in presets.
    #[inline]
    pub fn profiles_dir(&self) -> PathBuf {
        self.root.join("profiles")
    }

    #[inline]
    pub fn instances_dir(&self) -> PathBuf {
        self.root.join("state").join("instances")
    }

    /// Backup record metadata, one JSON file per record.
    #[inline]
    pub fn backup_index_dir(&self) -> PathBuf {
        self.root.join("state").join("backups")
    }

    /// Backup artifact storage, shared across invocations.
    #[inline]
    pub fn backup_artifacts_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.root.join("state").join(".lock")
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.profiles_dir())?;
        fs::create_dir_all(self.instances_dir())?;
        fs::create_dir_all(self.backup_index_dir())?;
        fs::create_dir_all(self.backup_artifacts_dir())?;

        let version_path = self.root.join("state").join(VERSION_FILE);
        if version_path.exists() {
            self.verify_version()?;
        } else {
            let ver = StateVersion {
                format_version: STATE_FORMAT_VERSION,
            };
            let content = serde_json::to_string_pretty(&ver)?;
            let state_dir = self.root.join("state");
            let mut tmp = NamedTempFile::new_in(&state_dir)?;
            tmp.write_all(content.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&version_path)
                .map_err(|e| StoreError::Io(e.error))?;
            crate::fsync_dir(&state_dir)?;
        }

        Ok(())
    }

    pub fn verify_version(&self) -> Result<(), StoreError> {
        let version_path = self.root.join("state").join(VERSION_FILE);
        let content = fs::read_to_string(&version_path)?;
        let ver: StateVersion = serde_json::from_str(&content)?;

        if ver.format_version != STATE_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: STATE_FORMAT_VERSION,
                found: ver.format_version,
            });
        }
        Ok(())
    }
}
