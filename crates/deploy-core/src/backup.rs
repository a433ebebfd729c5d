use crate::concurrency::shutdown_requested;
use crate::CoreError;
use deploy_profile::ResolvedConfig;
use deploy_runtime::{select_backend, RuntimeError, ServiceBackend, ServiceSpec};
use deploy_store::{
    BackupRecord, BackupStatus, BackupStore, InstanceRecord, InstanceState, InstanceStore,
    PruneReport, RetentionPolicy, RetentionSweeper, StateLayout,
};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-process counter folded into artifact names, so two backups taken in
/// the same second by the same process still get distinct paths.
static BACKUP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Orchestrates dump/load against the managed service.
///
/// Backups require a Running instance, restores require a Stopped one (the
/// underlying load is destructive). Neither is ever retried automatically.
pub struct BackupManager {
    layout: StateLayout,
    instances: InstanceStore,
    backups: BackupStore,
    backend: Arc<dyn ServiceBackend>,
}

impl BackupManager {
    pub fn for_config(layout: StateLayout, config: &ResolvedConfig) -> Result<Self, CoreError> {
        let backend = select_backend(&config.backend)?;
        Ok(Self::with_backend(layout, backend))
    }

    pub fn with_backend(layout: StateLayout, backend: Arc<dyn ServiceBackend>) -> Self {
        let instances = InstanceStore::new(layout.clone());
        let backups = BackupStore::new(layout.clone());
        Self {
            layout,
            instances,
            backups,
            backend,
        }
    }

    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    /// Dump the running service to a collision-resistant artifact path and
    /// record the result. The record is Pending while the dump runs and is
    /// finalized exactly once, to Complete (positive artifact size, checksum
    /// recorded) or Failed (captured diagnostics).
    pub fn backup(&self, config: &ResolvedConfig) -> Result<BackupRecord, CoreError> {
        self.backup_with_cancel(config, shutdown_requested)
    }

    /// `backup` with an explicit cancellation source. The flag is honored
    /// both before the dump starts and while it runs; a cancelled backup is
    /// finalized as Failed, loses its partial artifact, and surfaces
    /// `Cancelled`.
    pub fn backup_with_cancel(
        &self,
        config: &ResolvedConfig,
        should_stop: impl Fn() -> bool,
    ) -> Result<BackupRecord, CoreError> {
        self.layout.initialize()?;
        let record = self.instances.get(&config.name)?;
        if record.state != InstanceState::Running {
            return Err(CoreError::InstanceNotRunning(config.name.clone()));
        }
        if should_stop() {
            return Err(CoreError::Cancelled {
                operation: "backup".to_owned(),
            });
        }

        let id = artifact_id(&config.name);
        let artifact = self
            .layout
            .backup_artifacts_dir()
            .join(format!("{id}.dump"));
        let artifact_str = artifact.to_string_lossy().into_owned();

        let mut backup = BackupRecord::pending(&id, &config.name, &artifact_str);
        self.backups.put(&backup)?;
        info!("backing up instance '{}' to {artifact_str}", config.name);

        let spec = ServiceSpec::new(config);
        match self.backend.dump(&spec, &artifact, &should_stop) {
            Ok(()) => {
                let size = artifact.metadata().map(|m| m.len()).unwrap_or(0);
                if size == 0 {
                    return Err(self.fail_backup(backup, "dump produced an empty artifact"));
                }
                backup.size_bytes = size;
                backup.artifact_checksum = Some(hash_file(&artifact)?);
                backup.status = BackupStatus::Complete;
                self.backups.put(&backup)?;
                info!("backup '{id}' complete ({size} bytes)");
                Ok(backup)
            }
            Err(RuntimeError::Interrupted(_)) => {
                match self.fail_backup(backup, "cancelled before completion") {
                    CoreError::BackupFailed { .. } => Err(CoreError::Cancelled {
                        operation: "backup".to_owned(),
                    }),
                    store_err => Err(store_err),
                }
            }
            Err(e) => Err(self.fail_backup(backup, &e.to_string())),
        }
    }

    fn fail_backup(&self, mut backup: BackupRecord, diagnostic: &str) -> CoreError {
        warn!("backup '{}' failed: {diagnostic}", backup.id);
        // A partial artifact is never restorable; keep only the record.
        let _ = std::fs::remove_file(&backup.path);
        backup.status = BackupStatus::Failed;
        backup.diagnostic = Some(diagnostic.to_owned());
        if let Err(e) = self.backups.put(&backup) {
            return e.into();
        }
        CoreError::BackupFailed {
            id: backup.id,
            diagnostic: diagnostic.to_owned(),
        }
    }

    /// Load an artifact into the stopped service. The caller is responsible
    /// for starting the instance afterwards.
    pub fn restore(&self, config: &ResolvedConfig, from: &Path) -> Result<(), CoreError> {
        self.layout.initialize()?;
        let spec = ServiceSpec::new(config);

        let record = if self.instances.exists(&config.name) {
            self.instances.get(&config.name)?
        } else {
            // Restoring into a fresh instance is fine; record it as Stopped.
            let record = InstanceRecord::new(&config.name);
            self.instances.put(&record)?;
            record
        };

        if record.state != InstanceState::Stopped {
            return Err(CoreError::InstanceMustBeStopped(config.name.clone()));
        }
        // The record can lag reality; never load over a live container.
        if self.backend.status(&spec)?.running {
            return Err(CoreError::InstanceMustBeStopped(config.name.clone()));
        }
        if !from.is_file() {
            return Err(CoreError::RestoreFailed(format!(
                "artifact not found: {}",
                from.display()
            )));
        }

        info!(
            "restoring instance '{}' from {}",
            config.name,
            from.display()
        );
        self.backend
            .load(&spec, from)
            .map_err(|e| CoreError::RestoreFailed(e.to_string()))?;
        Ok(())
    }

    /// Apply the profile's retention policy to this instance's backups.
    pub fn prune(&self, config: &ResolvedConfig, dry_run: bool) -> Result<PruneReport, CoreError> {
        self.layout.initialize()?;
        let policy = RetentionPolicy {
            max_age_days: config.retention_days,
            max_count: config.retention_count,
        };
        debug!(
            "pruning backups for '{}' (max_age_days: {}, max_count: {})",
            config.name, policy.max_age_days, policy.max_count
        );
        let report = RetentionSweeper::new(self.layout.clone()).sweep_with_cancel(
            &config.name,
            policy,
            dry_run,
            shutdown_requested,
        )?;
        Ok(report)
    }
}

fn artifact_id(name: &str) -> String {
    let now = chrono::Utc::now();
    let stamp = now.format("%Y%m%d%H%M%S");
    let seq = BACKUP_SEQ.fetch_add(1, Ordering::SeqCst);
    let suffix = blake3::hash(
        format!("{}:{}:{seq}", now.timestamp_nanos_opt().unwrap_or_default(), std::process::id())
            .as_bytes(),
    )
    .to_hex()
    .to_string();
    format!("{name}-{stamp}-{}", &suffix[..8])
}

fn hash_file(path: &Path) -> Result<String, std::io::Error> {
    let mut hasher = blake3::Hasher::new();
    let mut file = std::fs::File::open(path)?;
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}
