use crate::layout::StateLayout;
use crate::{fsync_dir, StoreError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use tempfile::NamedTempFile;
use tracing::warn;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BackupStatus {
    Pending,
    Complete,
    Failed,
}

impl std::fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupStatus::Pending => write!(f, "pending"),
            BackupStatus::Complete => write!(f, "complete"),
            BackupStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Metadata for one backup artifact.
///
/// Created in `Pending` state when the dump starts and finalized exactly once
/// to `Complete` or `Failed`. A `Complete` record is immutable: the store
/// rejects any further update to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupRecord {
    pub id: String,
    pub instance: String,
    pub created_at: String,
    pub path: String,
    pub size_bytes: u64,
    pub status: BackupStatus,
    /// Captured stderr of the external dump on failure.
    #[serde(default)]
    pub diagnostic: Option<String>,
    /// blake3 checksum of the artifact, recorded when Complete.
    #[serde(default)]
    pub artifact_checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl BackupRecord {
    pub fn pending(id: &str, instance: &str, path: &str) -> Self {
        Self {
            id: id.to_owned(),
            instance: instance.to_owned(),
            created_at: chrono::Utc::now().to_rfc3339(),
            path: path.to_owned(),
            size_bytes: 0,
            status: BackupStatus::Pending,
            diagnostic: None,
            artifact_checksum: None,
            checksum: None,
        }
    }

    fn compute_checksum(&self) -> Result<String, StoreError> {
        let mut copy = self.clone();
        copy.checksum = None;
        let json = serde_json::to_string_pretty(&copy)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }
}

pub struct BackupStore {
    layout: StateLayout,
}

impl BackupStore {
    pub fn new(layout: StateLayout) -> Self {
        Self { layout }
    }

    /// Persist a record. Updating an existing `Complete` record is rejected;
    /// deletion via [`remove`](Self::remove) is the only further operation.
    pub fn put(&self, record: &BackupRecord) -> Result<(), StoreError> {
        let dir = self.layout.backup_index_dir();
        let dest = dir.join(&record.id);

        if dest.exists() {
            let mut existing = self.get(&record.id)?;
            if existing.status == BackupStatus::Complete {
                existing.checksum = None;
                let mut incoming = record.clone();
                incoming.checksum = None;
                if existing != incoming {
                    return Err(StoreError::BackupImmutable(record.id.clone()));
                }
            }
        }

        let mut with_checksum = record.clone();
        with_checksum.checksum = Some(with_checksum.compute_checksum()?);
        let content = serde_json::to_string_pretty(&with_checksum)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&dest).map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&dir)?;

        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<BackupRecord, StoreError> {
        let path = self.layout.backup_index_dir().join(id);
        if !path.exists() {
            return Err(StoreError::BackupNotFound(id.to_owned()));
        }
        let content = fs::read_to_string(&path)?;
        let record: BackupRecord = serde_json::from_str(&content)?;

        if let Some(ref expected) = record.checksum {
            let actual = record.compute_checksum()?;
            if actual != *expected {
                return Err(StoreError::IntegrityFailure {
                    name: id.to_owned(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        Ok(record)
    }

    /// Remove a record and its artifact file, if any.
    pub fn remove(&self, id: &str) -> Result<(), StoreError> {
        let record = self.get(id)?;
        let artifact = std::path::Path::new(&record.path);
        if artifact.exists() {
            fs::remove_file(artifact)?;
        }
        fs::remove_file(self.layout.backup_index_dir().join(id))?;
        Ok(())
    }

    /// All records, oldest first.
    pub fn list(&self) -> Result<Vec<BackupRecord>, StoreError> {
        let dir = self.layout.backup_index_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut results = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                let name = entry.file_name();
                let name_str = name.to_str().unwrap_or("");
                if !name_str.starts_with('.') {
                    match self.get(name_str) {
                        Ok(record) => results.push(record),
                        Err(e) => {
                            warn!("skipping unreadable backup record '{name_str}': {e}");
                        }
                    }
                }
            }
        }
        results.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(results)
    }

    /// Records for one instance, oldest first.
    pub fn list_for(&self, instance: &str) -> Result<Vec<BackupRecord>, StoreError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|r| r.instance == instance)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, BackupStore) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path());
        layout.initialize().unwrap();
        (dir, BackupStore::new(layout))
    }

    #[test]
    fn pending_record_roundtrip() {
        let (_dir, store) = store();
        let record = BackupRecord::pending("dev-001", "dev", "/tmp/dev-001.dump");
        store.put(&record).unwrap();

        let loaded = store.get("dev-001").unwrap();
        assert_eq!(loaded.status, BackupStatus::Pending);
        assert_eq!(loaded.instance, "dev");
        assert_eq!(loaded.size_bytes, 0);
    }

    #[test]
    fn pending_can_be_finalized() {
        let (_dir, store) = store();
        let mut record = BackupRecord::pending("dev-001", "dev", "/tmp/dev-001.dump");
        store.put(&record).unwrap();

        record.status = BackupStatus::Complete;
        record.size_bytes = 4096;
        record.artifact_checksum = Some("abc".to_owned());
        store.put(&record).unwrap();

        assert_eq!(store.get("dev-001").unwrap().status, BackupStatus::Complete);
    }

    #[test]
    fn complete_record_is_immutable() {
        let (_dir, store) = store();
        let mut record = BackupRecord::pending("dev-001", "dev", "/tmp/dev-001.dump");
        record.status = BackupStatus::Complete;
        record.size_bytes = 4096;
        store.put(&record).unwrap();

        record.size_bytes = 1;
        assert!(matches!(
            store.put(&record),
            Err(StoreError::BackupImmutable(_))
        ));
    }

    #[test]
    fn idempotent_rewrite_of_complete_record_is_allowed() {
        let (_dir, store) = store();
        let mut record = BackupRecord::pending("dev-001", "dev", "/tmp/dev-001.dump");
        record.status = BackupStatus::Complete;
        record.size_bytes = 4096;
        store.put(&record).unwrap();
        store.put(&record).unwrap();
    }

    #[test]
    fn remove_deletes_artifact() {
        let (dir, store) = store();
        let artifact = dir.path().join("backups").join("dev-001.dump");
        fs::write(&artifact, b"dump-bytes").unwrap();

        let mut record =
            BackupRecord::pending("dev-001", "dev", artifact.to_str().unwrap());
        record.status = BackupStatus::Failed;
        store.put(&record).unwrap();

        store.remove("dev-001").unwrap();
        assert!(!artifact.exists());
        assert!(matches!(
            store.get("dev-001"),
            Err(StoreError::BackupNotFound(_))
        ));
    }

    #[test]
    fn list_sorted_oldest_first() {
        let (_dir, store) = store();
        let mut a = BackupRecord::pending("b-002", "dev", "/tmp/b2");
        a.created_at = "2026-02-01T00:00:00Z".to_owned();
        let mut b = BackupRecord::pending("b-001", "dev", "/tmp/b1");
        b.created_at = "2026-01-01T00:00:00Z".to_owned();
        store.put(&a).unwrap();
        store.put(&b).unwrap();

        let ids: Vec<_> = store.list().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["b-001", "b-002"]);
    }

    #[test]
    fn list_for_filters_by_instance() {
        let (_dir, store) = store();
        store
            .put(&BackupRecord::pending("d-1", "dev", "/tmp/d1"))
            .unwrap();
        store
            .put(&BackupRecord::pending("s-1", "staging", "/tmp/s1"))
            .unwrap();

        let dev = store.list_for("dev").unwrap();
        assert_eq!(dev.len(), 1);
        assert_eq!(dev[0].id, "d-1");
    }
}
