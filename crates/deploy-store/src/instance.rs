use crate::layout::StateLayout;
use crate::{fsync_dir, StoreError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use tempfile::NamedTempFile;
use tracing::warn;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum InstanceState {
    Stopped,
    Starting,
    Running,
    Unhealthy,
    Stopping,
    Failed,
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceState::Stopped => write!(f, "stopped"),
            InstanceState::Starting => write!(f, "starting"),
            InstanceState::Running => write!(f, "running"),
            InstanceState::Unhealthy => write!(f, "unhealthy"),
            InstanceState::Stopping => write!(f, "stopping"),
            InstanceState::Failed => write!(f, "failed"),
        }
    }
}

impl InstanceState {
    /// States that hold the per-profile exclusivity claim. A second `start`
    /// against an instance in one of these states must fail fast.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            InstanceState::Starting | InstanceState::Running | InstanceState::Unhealthy
        )
    }
}

/// One lifecycle record of the managed service under a given profile.
///
/// The profile name doubles as the instance identity: there is at most one
/// record per name, and the controller enforces at most one active instance
/// per record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceRecord {
    pub name: String,
    pub state: InstanceState,
    #[serde(default)]
    pub container_id: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub health_failures: u32,
    /// blake3 checksum for integrity verification. `None` for legacy records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl InstanceRecord {
    pub fn new(name: &str) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            name: name.to_owned(),
            state: InstanceState::Stopped,
            container_id: None,
            started_at: None,
            created_at: now.clone(),
            updated_at: now,
            health_failures: 0,
            checksum: None,
        }
    }

    /// Compute the checksum over the record content (excluding the checksum field itself).
    fn compute_checksum(&self) -> Result<String, StoreError> {
        let mut copy = self.clone();
        copy.checksum = None;
        let json = serde_json::to_string_pretty(&copy)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }
}

pub fn validate_instance_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() || name.len() > 64 {
        return Err(StoreError::InvalidName(
            "instance name must be 1-64 characters".to_owned(),
        ));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(StoreError::InvalidName(
            "instance name must match [a-zA-Z0-9_-]".to_owned(),
        ));
    }
    Ok(())
}

pub struct InstanceStore {
    layout: StateLayout,
}

impl InstanceStore {
    pub fn new(layout: StateLayout) -> Self {
        Self { layout }
    }

    pub fn put(&self, record: &InstanceRecord) -> Result<(), StoreError> {
        validate_instance_name(&record.name)?;
        let dir = self.layout.instances_dir();
        let dest = dir.join(&record.name);

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

    pub fn get(&self, name: &str) -> Result<InstanceRecord, StoreError> {
        let path = self.layout.instances_dir().join(name);
        if !path.exists() {
            return Err(StoreError::InstanceNotFound(name.to_owned()));
        }
        let content = fs::read_to_string(&path)?;
        let record: InstanceRecord = serde_json::from_str(&content)?;

        if let Some(ref expected) = record.checksum {
            let actual = record.compute_checksum()?;
            if actual != *expected {
                return Err(StoreError::IntegrityFailure {
                    name: name.to_owned(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        Ok(record)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.layout.instances_dir().join(name).exists()
    }

    pub fn update_state(&self, name: &str, new_state: InstanceState) -> Result<(), StoreError> {
        let mut record = self.get(name)?;
        record.state = new_state;
        record.updated_at = chrono::Utc::now().to_rfc3339();
        self.put(&record)
    }

    pub fn remove(&self, name: &str) -> Result<(), StoreError> {
        let path = self.layout.instances_dir().join(name);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<InstanceRecord>, StoreError> {
        let dir = self.layout.instances_dir();
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
                            warn!("skipping unreadable instance record '{name_str}': {e}");
                        }
                    }
                }
            }
        }
        results.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, InstanceStore) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path());
        layout.initialize().unwrap();
        (dir, InstanceStore::new(layout))
    }

    #[test]
    fn put_get_roundtrip() {
        let (_dir, store) = store();
        let record = InstanceRecord::new("dev");
        store.put(&record).unwrap();

        let loaded = store.get("dev").unwrap();
        assert_eq!(loaded.name, "dev");
        assert_eq!(loaded.state, InstanceState::Stopped);
        assert!(loaded.checksum.is_some());
    }

    #[test]
    fn get_missing_fails() {
        let (_dir, store) = store();
        assert!(matches!(
            store.get("ghost"),
            Err(StoreError::InstanceNotFound(_))
        ));
    }

    #[test]
    fn update_state_persists() {
        let (_dir, store) = store();
        store.put(&InstanceRecord::new("dev")).unwrap();
        store.update_state("dev", InstanceState::Running).unwrap();
        assert_eq!(store.get("dev").unwrap().state, InstanceState::Running);
    }

    #[test]
    fn corrupted_record_fails_integrity() {
        let (dir, store) = store();
        store.put(&InstanceRecord::new("dev")).unwrap();

        let path = dir.path().join("state").join("instances").join("dev");
        let tampered = fs::read_to_string(&path)
            .unwrap()
            .replace("\"Stopped\"", "\"Running\"");
        fs::write(&path, tampered).unwrap();

        assert!(matches!(
            store.get("dev"),
            Err(StoreError::IntegrityFailure { .. })
        ));
    }

    #[test]
    fn list_is_sorted() {
        let (_dir, store) = store();
        store.put(&InstanceRecord::new("staging")).unwrap();
        store.put(&InstanceRecord::new("dev")).unwrap();
        let names: Vec<_> = store.list().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["dev", "staging"]);
    }

    #[test]
    fn remove_is_idempotent() {
        let (_dir, store) = store();
        store.put(&InstanceRecord::new("dev")).unwrap();
        store.remove("dev").unwrap();
        store.remove("dev").unwrap();
        assert!(!store.exists("dev"));
    }

    #[test]
    fn name_validation() {
        assert!(validate_instance_name("dev").is_ok());
        assert!(validate_instance_name("stage-2").is_ok());
        assert!(validate_instance_name("").is_err());
        assert!(validate_instance_name("has space").is_err());
        assert!(validate_instance_name(&"x".repeat(65)).is_err());
    }

    #[test]
    fn active_states() {
        assert!(InstanceState::Starting.is_active());
        assert!(InstanceState::Running.is_active());
        assert!(InstanceState::Unhealthy.is_active());
        assert!(!InstanceState::Stopped.is_active());
        assert!(!InstanceState::Stopping.is_active());
        assert!(!InstanceState::Failed.is_active());
    }
}
