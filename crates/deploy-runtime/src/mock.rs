use crate::backend::{BackendStatus, ServiceBackend, ServiceSpec};
use crate::health::{HealthProbe, HealthState};
use crate::RuntimeError;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct MockInstance {
    running: bool,
    container_id: String,
}

/// In-memory backend for tests. Instances live in a mutexed map, dumps are
/// real files (so artifact-size checks exercise the real path), and failure
/// modes are scriptable per backend handle.
pub struct MockBackend {
    state: Mutex<HashMap<String, MockInstance>>,
    launches: AtomicU64,
    fail_launch: AtomicBool,
    fail_dump: AtomicBool,
    fail_load: AtomicBool,
    /// When set, `dump` blocks until its `should_stop` callback fires.
    hang_dump: AtomicBool,
    /// When set, `signal_stop` is ignored and only `kill` stops the instance.
    refuse_stop: AtomicBool,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
            launches: AtomicU64::new(0),
            fail_launch: AtomicBool::new(false),
            fail_dump: AtomicBool::new(false),
            fail_load: AtomicBool::new(false),
            hang_dump: AtomicBool::new(false),
            refuse_stop: AtomicBool::new(false),
        }
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_launch(&self, fail: bool) {
        self.fail_launch.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_dump(&self, fail: bool) {
        self.fail_dump.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_load(&self, fail: bool) {
        self.fail_load.store(fail, Ordering::SeqCst);
    }

    pub fn set_hang_dump(&self, hang: bool) {
        self.hang_dump.store(hang, Ordering::SeqCst);
    }

    pub fn set_refuse_stop(&self, refuse: bool) {
        self.refuse_stop.store(refuse, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, MockInstance>>, RuntimeError>
    {
        self.state
            .lock()
            .map_err(|e| RuntimeError::ProbeFailed(format!("mutex poisoned: {e}")))
    }
}

impl ServiceBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn available(&self) -> bool {
        true
    }

    fn launch(&self, spec: &ServiceSpec) -> Result<String, RuntimeError> {
        if self.fail_launch.load(Ordering::SeqCst) {
            return Err(RuntimeError::CommandFailed {
                command: "mock launch".to_owned(),
                stderr: "scripted launch failure".to_owned(),
            });
        }
        let mut state = self.lock()?;
        if state.get(&spec.name).is_some_and(|i| i.running) {
            return Err(RuntimeError::AlreadyRunning(spec.name.clone()));
        }
        let n = self.launches.fetch_add(1, Ordering::SeqCst);
        let container_id = format!("mock-{}-{n}", spec.name);
        state.insert(
            spec.name.clone(),
            MockInstance {
                running: true,
                container_id: container_id.clone(),
            },
        );
        Ok(container_id)
    }

    fn signal_stop(&self, spec: &ServiceSpec) -> Result<(), RuntimeError> {
        if self.refuse_stop.load(Ordering::SeqCst) {
            return Ok(());
        }
        let mut state = self.lock()?;
        match state.get_mut(&spec.name) {
            Some(instance) if instance.running => {
                instance.running = false;
                Ok(())
            }
            _ => Err(RuntimeError::NotRunning(spec.name.clone())),
        }
    }

    fn kill(&self, spec: &ServiceSpec) -> Result<(), RuntimeError> {
        let mut state = self.lock()?;
        state.remove(&spec.name);
        Ok(())
    }

    fn status(&self, spec: &ServiceSpec) -> Result<BackendStatus, RuntimeError> {
        let state = self.lock()?;
        let instance = state.get(&spec.name);
        Ok(BackendStatus {
            name: spec.name.clone(),
            running: instance.is_some_and(|i| i.running),
            container_id: instance.map(|i| i.container_id.clone()),
        })
    }

    fn dump(
        &self,
        spec: &ServiceSpec,
        dest: &Path,
        should_stop: &dyn Fn() -> bool,
    ) -> Result<(), RuntimeError> {
        if self.fail_dump.load(Ordering::SeqCst) {
            // Leave a half-written artifact, as an aborted dump would.
            let _ = std::fs::write(dest, "partial");
            return Err(RuntimeError::CommandFailed {
                command: "mock dump".to_owned(),
                stderr: "scripted dump failure".to_owned(),
            });
        }
        {
            let state = self.lock()?;
            if !state.get(&spec.name).is_some_and(|i| i.running) {
                return Err(RuntimeError::NotRunning(spec.name.clone()));
            }
        }
        if self.hang_dump.load(Ordering::SeqCst) {
            while !should_stop() {
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
            let _ = std::fs::write(dest, "partial");
            return Err(RuntimeError::Interrupted("mock dump".to_owned()));
        }
        std::fs::write(dest, format!("mock-dump:{}\n", spec.name))?;
        Ok(())
    }

    fn load(&self, spec: &ServiceSpec, source: &Path) -> Result<(), RuntimeError> {
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(RuntimeError::CommandFailed {
                command: "mock load".to_owned(),
                stderr: "scripted load failure".to_owned(),
            });
        }
        if !source.exists() {
            return Err(RuntimeError::CommandFailed {
                command: "mock load".to_owned(),
                stderr: format!("no such artifact: {}", source.display()),
            });
        }
        let _ = spec;
        Ok(())
    }

    fn probe_query(&self, spec: &ServiceSpec) -> Result<String, RuntimeError> {
        let state = self.lock()?;
        if state.get(&spec.name).is_some_and(|i| i.running) {
            Ok("1".to_owned())
        } else {
            Err(RuntimeError::NotRunning(spec.name.clone()))
        }
    }

    fn tail_logs(&self, spec: &ServiceSpec, lines: u32) -> Result<String, RuntimeError> {
        Ok(format!("mock-logs:{}:{lines}\n", spec.name))
    }
}

/// Scripted health probe for controller tests: pops queued responses, then
/// settles on a steady state.
pub struct MockProbe {
    queued: Mutex<VecDeque<HealthState>>,
    steady: HealthState,
}

impl MockProbe {
    pub fn healthy() -> Self {
        Self::sequence(Vec::new(), HealthState::Healthy)
    }

    pub fn always(steady: HealthState) -> Self {
        Self::sequence(Vec::new(), steady)
    }

    pub fn sequence(queued: Vec<HealthState>, steady: HealthState) -> Self {
        Self {
            queued: Mutex::new(queued.into()),
            steady,
        }
    }
}

impl HealthProbe for MockProbe {
    fn check(&self) -> HealthState {
        self.queued
            .lock()
            .map(|mut q| q.pop_front())
            .unwrap_or(None)
            .unwrap_or(self.steady)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deploy_profile::resolve;
    use std::collections::BTreeMap;

    fn spec() -> ServiceSpec {
        ServiceSpec::new(&resolve("dev", None, &BTreeMap::new()).unwrap())
    }

    #[test]
    fn launch_stop_cycle() {
        let backend = MockBackend::new();
        let spec = spec();

        let id = backend.launch(&spec).unwrap();
        assert!(id.starts_with("mock-dev-"));
        assert!(backend.status(&spec).unwrap().running);

        assert!(matches!(
            backend.launch(&spec),
            Err(RuntimeError::AlreadyRunning(_))
        ));

        backend.signal_stop(&spec).unwrap();
        assert!(!backend.status(&spec).unwrap().running);
    }

    #[test]
    fn refuse_stop_requires_kill() {
        let backend = MockBackend::new();
        let spec = spec();
        backend.launch(&spec).unwrap();
        backend.set_refuse_stop(true);

        backend.signal_stop(&spec).unwrap();
        assert!(backend.status(&spec).unwrap().running);

        backend.kill(&spec).unwrap();
        assert!(!backend.status(&spec).unwrap().running);
    }

    #[test]
    fn dump_writes_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::new();
        let spec = spec();
        backend.launch(&spec).unwrap();

        let dest = dir.path().join("dev.dump");
        backend.dump(&spec, &dest, &|| false).unwrap();
        assert!(dest.metadata().unwrap().len() > 0);
    }

    #[test]
    fn dump_fails_when_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::new();
        assert!(matches!(
            backend.dump(&spec(), &dir.path().join("x.dump"), &|| false),
            Err(RuntimeError::NotRunning(_))
        ));
    }

    #[test]
    fn hanging_dump_stops_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::new();
        let spec = spec();
        backend.launch(&spec).unwrap();
        backend.set_hang_dump(true);

        let err = backend
            .dump(&spec, &dir.path().join("x.dump"), &|| true)
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Interrupted(_)));
    }

    #[test]
    fn scripted_dump_failure() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::new();
        let spec = spec();
        backend.launch(&spec).unwrap();
        backend.set_fail_dump(true);

        let err = backend
            .dump(&spec, &dir.path().join("x.dump"), &|| false)
            .unwrap_err();
        assert!(err.to_string().contains("scripted dump failure"));
    }

    #[test]
    fn probe_query_reflects_running() {
        let backend = MockBackend::new();
        let spec = spec();
        assert!(backend.probe_query(&spec).is_err());
        backend.launch(&spec).unwrap();
        assert_eq!(backend.probe_query(&spec).unwrap(), "1");
    }

    #[test]
    fn mock_probe_sequence_then_steady() {
        let probe = MockProbe::sequence(
            vec![HealthState::Unreachable, HealthState::HttpUnhealthy],
            HealthState::Healthy,
        );
        assert_eq!(probe.check(), HealthState::Unreachable);
        assert_eq!(probe.check(), HealthState::HttpUnhealthy);
        assert_eq!(probe.check(), HealthState::Healthy);
        assert_eq!(probe.check(), HealthState::Healthy);
    }
}
