//! End-to-end lifecycle and backup scenarios against the mock backend.

use deploy_core::{BackupManager, Controller, CoreError, PollSettings};
use std::sync::atomic::{AtomicBool, Ordering};
use deploy_profile::{resolve, OverrideMap, ResolvedConfig};
use deploy_runtime::{HealthState, MockBackend, MockProbe, ServiceBackend, ServiceSpec};
use deploy_store::{
    BackupStatus, BackupStore, InstanceState, InstanceStore, StateLayout, StoreError,
};
use std::sync::Arc;
use std::time::Duration;

fn test_config(name: &str) -> ResolvedConfig {
    let mut overrides = OverrideMap::new();
    overrides.insert("runtime.backend".to_owned(), "mock".to_owned());
    overrides.insert("health.start_timeout_secs".to_owned(), "2".to_owned());
    overrides.insert("health.drain_timeout_secs".to_owned(), "1".to_owned());
    resolve(name, None, &overrides).unwrap()
}

fn fast_poll() -> PollSettings {
    PollSettings {
        initial: Duration::from_millis(5),
        cap: Duration::from_millis(20),
    }
}

fn controller(
    layout: &StateLayout,
    backend: &Arc<MockBackend>,
    probe: MockProbe,
) -> Controller {
    Controller::with_parts(
        layout.clone(),
        Arc::clone(backend) as Arc<dyn ServiceBackend>,
        Arc::new(probe),
    )
    .with_poll(fast_poll())
}

fn setup() -> (tempfile::TempDir, StateLayout, Arc<MockBackend>) {
    let dir = tempfile::tempdir().unwrap();
    let layout = StateLayout::new(dir.path());
    layout.initialize().unwrap();
    (dir, layout, Arc::new(MockBackend::new()))
}

#[test]
fn start_reaches_running_once_healthy() {
    let (_dir, layout, backend) = setup();
    let config = test_config("dev");
    assert_eq!(config.heap_max_bytes, 1_073_741_824); // dev preset heap_max "1G"

    let ctl = controller(&layout, &backend, MockProbe::healthy());
    let record = ctl.start(&config).unwrap();

    assert_eq!(record.state, InstanceState::Running);
    assert!(record.container_id.is_some());
    assert!(record.started_at.is_some());

    let report = ctl.status(&config).unwrap();
    assert_eq!(report.health, Some(HealthState::Healthy));
}

#[test]
fn start_waits_through_unready_probes() {
    let (_dir, layout, backend) = setup();
    let config = test_config("dev");

    let probe = MockProbe::sequence(
        vec![
            HealthState::Unreachable,
            HealthState::Unreachable,
            HealthState::HttpUnhealthy,
        ],
        HealthState::Healthy,
    );
    let ctl = controller(&layout, &backend, probe);
    let record = ctl.start(&config).unwrap();
    assert_eq!(record.state, InstanceState::Running);
}

#[test]
fn second_start_is_already_running() {
    let (_dir, layout, backend) = setup();
    let config = test_config("dev");

    let ctl = controller(&layout, &backend, MockProbe::healthy());
    ctl.start(&config).unwrap();

    assert!(matches!(
        ctl.start(&config),
        Err(CoreError::AlreadyRunning(_))
    ));
}

#[test]
fn start_timeout_marks_failed() {
    let (_dir, layout, backend) = setup();
    let mut overrides = OverrideMap::new();
    overrides.insert("runtime.backend".to_owned(), "mock".to_owned());
    overrides.insert("health.start_timeout_secs".to_owned(), "0".to_owned());
    let config = resolve("dev", None, &overrides).unwrap();

    let ctl = controller(&layout, &backend, MockProbe::always(HealthState::Unreachable));
    let err = ctl.start(&config).unwrap_err();
    assert!(matches!(err, CoreError::StartTimeout { .. }));

    let record = InstanceStore::new(layout).get("dev").unwrap();
    assert_eq!(record.state, InstanceState::Failed);
}

#[test]
fn launch_failure_marks_failed() {
    let (_dir, layout, backend) = setup();
    let config = test_config("dev");
    backend.set_fail_launch(true);

    let ctl = controller(&layout, &backend, MockProbe::healthy());
    assert!(ctl.start(&config).is_err());

    let record = InstanceStore::new(layout).get("dev").unwrap();
    assert_eq!(record.state, InstanceState::Failed);
}

#[test]
fn start_then_stop_returns_to_stopped() {
    let (_dir, layout, backend) = setup();
    let config = test_config("dev");

    let ctl = controller(&layout, &backend, MockProbe::healthy());
    ctl.start(&config).unwrap();
    let record = ctl.stop(&config, false).unwrap();

    assert_eq!(record.state, InstanceState::Stopped);
    assert!(record.container_id.is_none());
    assert!(!backend.status(&ServiceSpec::new(&config)).unwrap().running);
}

#[test]
fn stop_unknown_instance_fails() {
    let (_dir, layout, backend) = setup();
    let config = test_config("dev");

    let ctl = controller(&layout, &backend, MockProbe::healthy());
    assert!(matches!(
        ctl.stop(&config, false),
        Err(CoreError::Store(StoreError::InstanceNotFound(_)))
    ));
}

#[test]
fn stop_is_idempotent_on_stopped_instance() {
    let (_dir, layout, backend) = setup();
    let config = test_config("dev");

    let ctl = controller(&layout, &backend, MockProbe::healthy());
    ctl.start(&config).unwrap();
    ctl.stop(&config, false).unwrap();
    let record = ctl.stop(&config, false).unwrap();
    assert_eq!(record.state, InstanceState::Stopped);
}

#[test]
fn drain_expiry_escalates_to_kill() {
    let (_dir, layout, backend) = setup();
    let mut overrides = OverrideMap::new();
    overrides.insert("runtime.backend".to_owned(), "mock".to_owned());
    overrides.insert("health.drain_timeout_secs".to_owned(), "0".to_owned());
    let config = resolve("dev", None, &overrides).unwrap();

    let ctl = controller(&layout, &backend, MockProbe::healthy());
    ctl.start(&config).unwrap();

    // Service ignores the graceful signal; only kill takes it down.
    backend.set_refuse_stop(true);
    let record = ctl.stop(&config, false).unwrap();
    assert_eq!(record.state, InstanceState::Stopped);
}

#[test]
fn restart_cycles_back_to_running() {
    let (_dir, layout, backend) = setup();
    let config = test_config("dev");

    let ctl = controller(&layout, &backend, MockProbe::healthy());
    let first = ctl.start(&config).unwrap();
    let second = ctl.restart(&config).unwrap();

    assert_eq!(second.state, InstanceState::Running);
    assert_ne!(first.container_id, second.container_id);
}

#[test]
fn status_unknown_instance_fails() {
    let (_dir, layout, backend) = setup();
    let config = test_config("dev");

    let ctl = controller(&layout, &backend, MockProbe::healthy());
    assert!(matches!(
        ctl.status(&config),
        Err(CoreError::Store(StoreError::InstanceNotFound(_)))
    ));
}

#[test]
fn supervision_gives_up_after_failure_budget() {
    let (_dir, layout, backend) = setup();
    let config = test_config("dev"); // max_consecutive_failures: 3

    // Healthy for start, then persistently failing.
    let probe = MockProbe::sequence(vec![HealthState::Healthy], HealthState::ProtocolUnhealthy);
    let ctl = controller(&layout, &backend, probe);
    ctl.start(&config).unwrap();

    let first = ctl.check(&config).unwrap();
    assert_eq!(first.state, InstanceState::Unhealthy);
    assert!(!first.gave_up);

    let second = ctl.check(&config).unwrap();
    assert!(!second.gave_up);

    let third = ctl.check(&config).unwrap();
    assert!(third.gave_up);
    assert_eq!(third.state, InstanceState::Stopped);
}

#[test]
fn supervision_recovers_unhealthy_instance() {
    let (_dir, layout, backend) = setup();
    let config = test_config("dev");

    let probe = MockProbe::sequence(
        vec![HealthState::Healthy, HealthState::HttpUnhealthy],
        HealthState::Healthy,
    );
    let ctl = controller(&layout, &backend, probe);
    ctl.start(&config).unwrap();

    let failing = ctl.check(&config).unwrap();
    assert_eq!(failing.state, InstanceState::Unhealthy);

    let recovered = ctl.check(&config).unwrap();
    assert_eq!(recovered.state, InstanceState::Running);
    assert_eq!(
        InstanceStore::new(layout).get("dev").unwrap().health_failures,
        0
    );
}

#[test]
fn stale_running_record_is_reconciled() {
    let (_dir, layout, backend) = setup();
    let config = test_config("dev");

    let ctl = controller(&layout, &backend, MockProbe::healthy());
    ctl.start(&config).unwrap();

    // Container vanishes behind the controller's back.
    backend.kill(&ServiceSpec::new(&config)).unwrap();

    let report = ctl.status(&config).unwrap();
    assert_eq!(report.record.state, InstanceState::Failed);
    assert_eq!(report.health, None);

    // And a fresh start works again after the reconcile.
    assert_eq!(
        ctl.start(&config).unwrap().state,
        InstanceState::Running
    );
}

#[test]
fn backup_on_running_instance_completes() {
    let (dir, layout, backend) = setup();
    let config = test_config("staging");

    let ctl = controller(&layout, &backend, MockProbe::healthy());
    ctl.start(&config).unwrap();

    let manager = BackupManager::with_backend(layout, Arc::clone(&backend) as _);
    let record = manager.backup(&config).unwrap();

    assert_eq!(record.status, BackupStatus::Complete);
    assert!(record.size_bytes > 0);
    assert!(record.artifact_checksum.is_some());
    assert!(record.path.starts_with(dir.path().to_str().unwrap()));
    assert!(std::path::Path::new(&record.path).is_file());
}

#[test]
fn backup_on_stopped_instance_is_rejected() {
    let (_dir, layout, backend) = setup();
    let config = test_config("dev");

    let ctl = controller(&layout, &backend, MockProbe::healthy());
    ctl.start(&config).unwrap();
    ctl.stop(&config, false).unwrap();

    let manager = BackupManager::with_backend(layout.clone(), Arc::clone(&backend) as _);
    assert!(matches!(
        manager.backup(&config),
        Err(CoreError::InstanceNotRunning(_))
    ));
    assert!(BackupStore::new(layout).list().unwrap().is_empty());
}

#[test]
fn failed_dump_records_diagnostics() {
    let (_dir, layout, backend) = setup();
    let config = test_config("dev");

    let ctl = controller(&layout, &backend, MockProbe::healthy());
    ctl.start(&config).unwrap();
    backend.set_fail_dump(true);

    let manager = BackupManager::with_backend(layout.clone(), Arc::clone(&backend) as _);
    let err = manager.backup(&config).unwrap_err();
    assert!(matches!(err, CoreError::BackupFailed { .. }));

    let records = BackupStore::new(layout).list().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, BackupStatus::Failed);
    assert!(records[0]
        .diagnostic
        .as_deref()
        .unwrap()
        .contains("scripted dump failure"));
}

#[test]
fn failed_dump_removes_partial_artifact() {
    let (_dir, layout, backend) = setup();
    let config = test_config("dev");

    let ctl = controller(&layout, &backend, MockProbe::healthy());
    ctl.start(&config).unwrap();
    backend.set_fail_dump(true);

    let manager = BackupManager::with_backend(layout, Arc::clone(&backend) as _);
    let err = manager.backup(&config).unwrap_err();
    let CoreError::BackupFailed { id, .. } = err else {
        panic!("expected BackupFailed, got {err}");
    };

    let record = manager.backups().get(&id).unwrap();
    assert_eq!(record.status, BackupStatus::Failed);
    assert!(!std::path::Path::new(&record.path).exists());
}

#[test]
fn cancel_mid_dump_surfaces_cancelled() {
    static CANCEL: AtomicBool = AtomicBool::new(false);

    let (_dir, layout, backend) = setup();
    let config = test_config("dev");

    let ctl = controller(&layout, &backend, MockProbe::healthy());
    ctl.start(&config).unwrap();
    backend.set_hang_dump(true);

    let flip = std::thread::spawn(|| {
        std::thread::sleep(Duration::from_millis(30));
        CANCEL.store(true, Ordering::SeqCst);
    });

    let manager = BackupManager::with_backend(layout, Arc::clone(&backend) as _);
    let err = manager
        .backup_with_cancel(&config, || CANCEL.load(Ordering::SeqCst))
        .unwrap_err();
    flip.join().unwrap();

    assert!(matches!(err, CoreError::Cancelled { ref operation } if operation == "backup"));
    let records = manager.backups().list_for("dev").unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, BackupStatus::Failed);
    assert!(!std::path::Path::new(&records[0].path).exists());
}

#[test]
fn start_while_stopping_with_live_container_is_rejected() {
    let (_dir, layout, backend) = setup();
    let config = test_config("dev");

    let ctl = controller(&layout, &backend, MockProbe::healthy());
    let mut record = ctl.start(&config).unwrap();

    // A crashed stop leaves the record in Stopping with the container up.
    record.state = InstanceState::Stopping;
    ctl.instances().put(&record).unwrap();

    let err = ctl.start(&config).unwrap_err();
    assert!(matches!(err, CoreError::AlreadyRunning(_)));
}

#[test]
fn concurrent_backups_use_distinct_paths() {
    let (_dir, layout, backend) = setup();
    let config = test_config("staging");

    let ctl = controller(&layout, &backend, MockProbe::healthy());
    ctl.start(&config).unwrap();

    let manager = Arc::new(BackupManager::with_backend(
        layout,
        Arc::clone(&backend) as _,
    ));
    let mut paths = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let config = config.clone();
                scope.spawn(move || manager.backup(&config).unwrap().path)
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<Vec<_>>()
    });
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), 2);
}

#[test]
fn restore_on_running_instance_is_rejected() {
    let (dir, layout, backend) = setup();
    let config = test_config("dev");

    let ctl = controller(&layout, &backend, MockProbe::healthy());
    ctl.start(&config).unwrap();

    let artifact = dir.path().join("old.dump");
    std::fs::write(&artifact, b"dump-bytes").unwrap();

    let manager = BackupManager::with_backend(layout, Arc::clone(&backend) as _);
    assert!(matches!(
        manager.restore(&config, &artifact),
        Err(CoreError::InstanceMustBeStopped(_))
    ));
}

#[test]
fn restore_on_stopped_instance_succeeds() {
    let (dir, layout, backend) = setup();
    let config = test_config("dev");

    let ctl = controller(&layout, &backend, MockProbe::healthy());
    ctl.start(&config).unwrap();
    ctl.stop(&config, false).unwrap();

    let artifact = dir.path().join("old.dump");
    std::fs::write(&artifact, b"dump-bytes").unwrap();

    let manager = BackupManager::with_backend(layout, Arc::clone(&backend) as _);
    manager.restore(&config, &artifact).unwrap();

    // Caller is responsible for the subsequent start.
    assert_eq!(ctl.start(&config).unwrap().state, InstanceState::Running);
}

#[test]
fn restore_missing_artifact_fails() {
    let (dir, layout, backend) = setup();
    let config = test_config("dev");

    let manager = BackupManager::with_backend(layout, Arc::clone(&backend) as _);
    let err = manager
        .restore(&config, &dir.path().join("nope.dump"))
        .unwrap_err();
    assert!(matches!(err, CoreError::RestoreFailed(_)));
}

#[test]
fn prune_with_zero_retention_removes_completed_backup() {
    let (_dir, layout, backend) = setup();
    let mut overrides = OverrideMap::new();
    overrides.insert("runtime.backend".to_owned(), "mock".to_owned());
    overrides.insert("backup.retention_days".to_owned(), "0".to_owned());
    overrides.insert("backup.retention_count".to_owned(), "0".to_owned());
    let config = resolve("staging", None, &overrides).unwrap();

    let ctl = controller(&layout, &backend, MockProbe::healthy());
    ctl.start(&config).unwrap();

    let manager = BackupManager::with_backend(layout.clone(), Arc::clone(&backend) as _);
    manager.backup(&config).unwrap();

    let report = manager.prune(&config, false).unwrap();
    assert_eq!(report.removed, 1);
    assert!(BackupStore::new(layout).list().unwrap().is_empty());
}
