use crate::concurrency::shutdown_requested;
use crate::lifecycle::validate_transition;
use crate::CoreError;
use deploy_profile::ResolvedConfig;
use deploy_runtime::{
    select_backend, EndpointProber, HealthProbe, HealthState, QueryProber, ServiceBackend,
    ServiceSpec,
};
use deploy_store::{InstanceRecord, InstanceState, InstanceStore, StateLayout};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Backoff parameters for readiness/drain polling. The defaults match the
/// documented contract (initial 1s, cap 30s); tests shrink them.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub initial: Duration,
    pub cap: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            cap: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub record: InstanceRecord,
    /// `None` when the instance is not active, so no probe was attempted.
    pub health: Option<HealthState>,
}

#[derive(Debug, Serialize)]
pub struct CheckOutcome {
    pub health: HealthState,
    pub state: InstanceState,
    /// True when consecutive failures crossed the configured budget and the
    /// instance was stopped.
    pub gave_up: bool,
}

/// Drives one service instance through its lifecycle.
///
/// The controller is the only component that mutates instance records. Every
/// operation re-reads the record, reconciles it against the backend's view
/// of the container, and persists each transition before acting on it.
pub struct Controller {
    layout: StateLayout,
    instances: InstanceStore,
    backend: Arc<dyn ServiceBackend>,
    prober: Arc<dyn HealthProbe>,
    poll: PollSettings,
}

impl Controller {
    /// Build a controller for the backend and endpoints named by `config`.
    /// The mock backend serves no sockets, so it gets the backend-query
    /// probe instead of the endpoint pipeline.
    pub fn for_config(layout: StateLayout, config: &ResolvedConfig) -> Result<Self, CoreError> {
        let backend = select_backend(&config.backend)?;
        let prober: Arc<dyn HealthProbe> = if config.backend == "mock" {
            Arc::new(QueryProber::new(config, Arc::clone(&backend)))
        } else {
            Arc::new(EndpointProber::new(config, Arc::clone(&backend)))
        };
        Ok(Self::with_parts(layout, backend, prober))
    }

    /// Build from explicit parts. Tests inject a mock backend and probe here.
    pub fn with_parts(
        layout: StateLayout,
        backend: Arc<dyn ServiceBackend>,
        prober: Arc<dyn HealthProbe>,
    ) -> Self {
        let instances = InstanceStore::new(layout.clone());
        Self {
            layout,
            instances,
            backend,
            prober,
            poll: PollSettings::default(),
        }
    }

    #[must_use]
    pub fn with_poll(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    pub fn instances(&self) -> &InstanceStore {
        &self.instances
    }

    /// Start the managed service and wait for it to become healthy.
    ///
    /// Fails fast with `AlreadyRunning` when the instance already holds the
    /// exclusivity claim. Does not return a Running record before the first
    /// Healthy probe.
    pub fn start(&self, config: &ResolvedConfig) -> Result<InstanceRecord, CoreError> {
        self.layout.initialize()?;
        let spec = ServiceSpec::new(config);
        let mut record = self.load_or_create(&config.name)?;
        self.reconcile(&spec, &mut record)?;

        // A Stopping record that survived reconcile still has a live
        // container, so its exclusivity claim is not released yet.
        if record.state.is_active() || record.state == InstanceState::Stopping {
            return Err(CoreError::AlreadyRunning(config.name.clone()));
        }

        info!("starting instance '{}'", config.name);
        self.transition(&mut record, InstanceState::Starting)?;

        let container_id = match self.backend.launch(&spec) {
            Ok(id) => id,
            Err(e) => {
                self.transition(&mut record, InstanceState::Failed)?;
                return Err(e.into());
            }
        };
        record.container_id = Some(container_id);
        self.persist(&mut record)?;

        self.await_healthy(config, &spec, &mut record)?;

        record.started_at = Some(chrono::Utc::now().to_rfc3339());
        record.health_failures = 0;
        self.transition(&mut record, InstanceState::Running)?;
        info!("instance '{}' is running and healthy", config.name);
        Ok(record)
    }

    /// Readiness poll with exponential backoff, bounded by the profile's
    /// start timeout. Leaves `record` in Starting on success; the caller
    /// completes the transition to Running.
    fn await_healthy(
        &self,
        config: &ResolvedConfig,
        spec: &ServiceSpec,
        record: &mut InstanceRecord,
    ) -> Result<(), CoreError> {
        let started = Instant::now();
        let deadline = started + Duration::from_secs(config.start_timeout_secs);
        let mut delay = self.poll.initial;

        loop {
            if shutdown_requested() {
                return Err(self.cancel("start", spec, record));
            }
            let health = self.prober.check();
            if health.is_healthy() {
                return Ok(());
            }
            debug!("instance '{}' not ready yet: {health}", config.name);

            let now = Instant::now();
            if now >= deadline {
                let logs = self.backend.tail_logs(spec, 50).unwrap_or_default();
                let _ = self.backend.kill(spec);
                self.transition(record, InstanceState::Failed)?;
                return Err(CoreError::StartTimeout {
                    name: config.name.clone(),
                    waited_secs: started.elapsed().as_secs(),
                    last: health,
                    logs,
                });
            }
            std::thread::sleep(delay.min(deadline.saturating_duration_since(now)));
            delay = (delay * 2).min(self.poll.cap);
        }
    }

    /// Stop the managed service, waiting up to the profile's drain timeout
    /// for a clean exit before forcing termination. Does not report Stopped
    /// before the backend confirms the exit.
    pub fn stop(&self, config: &ResolvedConfig, force: bool) -> Result<InstanceRecord, CoreError> {
        self.layout.initialize()?;
        let spec = ServiceSpec::new(config);
        let mut record = self.instances.get(&config.name)?;
        self.reconcile(&spec, &mut record)?;

        match record.state {
            InstanceState::Stopped => {
                debug!("instance '{}' already stopped", config.name);
                return Ok(record);
            }
            InstanceState::Failed => {
                // Backend confirmed not running during reconcile; normalize.
                self.transition(&mut record, InstanceState::Stopping)?;
                self.finish_stop(&mut record)?;
                return Ok(record);
            }
            _ => {}
        }

        info!("stopping instance '{}' (force: {force})", config.name);
        if record.state != InstanceState::Stopping {
            self.transition(&mut record, InstanceState::Stopping)?;
        }

        if force {
            self.backend.kill(&spec)?;
        } else if let Err(e) = self.backend.signal_stop(&spec) {
            // Already-exited races are resolved by the wait loop below.
            warn!("graceful stop signal failed for '{}': {e}", config.name);
        }

        let started = Instant::now();
        let deadline = started + Duration::from_secs(config.drain_timeout_secs);
        let mut escalated = force;

        loop {
            if shutdown_requested() {
                return Err(self.cancel("stop", &spec, &mut record));
            }
            if !self.backend.status(&spec)?.running {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                if escalated {
                    self.transition(&mut record, InstanceState::Failed)?;
                    return Err(CoreError::StopTimeout {
                        name: config.name.clone(),
                        waited_secs: started.elapsed().as_secs(),
                    });
                }
                warn!(
                    "instance '{}' did not drain within {}s, forcing termination",
                    config.name, config.drain_timeout_secs
                );
                self.backend.kill(&spec)?;
                escalated = true;
                continue;
            }
            std::thread::sleep(
                self.poll
                    .initial
                    .min(deadline.saturating_duration_since(now)),
            );
        }

        self.finish_stop(&mut record)?;
        info!("instance '{}' stopped", config.name);
        Ok(record)
    }

    fn finish_stop(&self, record: &mut InstanceRecord) -> Result<(), CoreError> {
        record.container_id = None;
        record.started_at = None;
        record.health_failures = 0;
        self.transition(record, InstanceState::Stopped)
    }

    /// Graceful stop followed by start. If the stop does not reach Stopped,
    /// reports `RestartFailed` instead of starting on top of a non-terminal
    /// state.
    pub fn restart(&self, config: &ResolvedConfig) -> Result<InstanceRecord, CoreError> {
        match self.stop(config, false) {
            Ok(record) if record.state == InstanceState::Stopped => {}
            Ok(record) => {
                return Err(CoreError::RestartFailed(format!(
                    "instance '{}' is {} after stop",
                    config.name, record.state
                )));
            }
            Err(e) => {
                return Err(CoreError::RestartFailed(e.to_string()));
            }
        }
        self.start(config)
    }

    /// Current record plus a health probe when the instance is active.
    pub fn status(&self, config: &ResolvedConfig) -> Result<StatusReport, CoreError> {
        let spec = ServiceSpec::new(config);
        let mut record = self.instances.get(&config.name)?;
        self.reconcile(&spec, &mut record)?;

        let health = if record.state.is_active() {
            Some(self.prober.check())
        } else {
            None
        };
        Ok(StatusReport { record, health })
    }

    /// One supervision tick: probe, track consecutive failures, mark the
    /// instance Unhealthy, recover it, or give up and stop it after the
    /// configured failure budget.
    pub fn check(&self, config: &ResolvedConfig) -> Result<CheckOutcome, CoreError> {
        let spec = ServiceSpec::new(config);
        let mut record = self.instances.get(&config.name)?;
        self.reconcile(&spec, &mut record)?;

        if !record.state.is_active() {
            return Ok(CheckOutcome {
                health: HealthState::Unreachable,
                state: record.state,
                gave_up: false,
            });
        }

        let health = self.prober.check();
        if health.is_healthy() {
            if record.state == InstanceState::Unhealthy {
                info!("instance '{}' recovered", config.name);
                self.transition(&mut record, InstanceState::Running)?;
            }
            record.health_failures = 0;
            self.persist(&mut record)?;
            return Ok(CheckOutcome {
                health,
                state: record.state,
                gave_up: false,
            });
        }

        record.health_failures += 1;
        warn!(
            "health check failed for '{}' ({}, {} consecutive)",
            config.name, health, record.health_failures
        );
        if record.state == InstanceState::Running {
            self.transition(&mut record, InstanceState::Unhealthy)?;
        } else {
            self.persist(&mut record)?;
        }

        if record.health_failures >= config.max_consecutive_failures {
            info!(
                "giving up on instance '{}' after {} failed checks",
                config.name, record.health_failures
            );
            let record = self.stop(config, false)?;
            return Ok(CheckOutcome {
                health,
                state: record.state,
                gave_up: true,
            });
        }

        Ok(CheckOutcome {
            health,
            state: record.state,
            gave_up: false,
        })
    }

    fn load_or_create(&self, name: &str) -> Result<InstanceRecord, CoreError> {
        if self.instances.exists(name) {
            Ok(self.instances.get(name)?)
        } else {
            Ok(InstanceRecord::new(name))
        }
    }

    /// Align the record with the backend's view of the container. A record
    /// claiming activity for a vanished container goes to Failed (Stopping
    /// goes to Stopped); a container running behind a passive record is
    /// adopted as Running. Reconciliation reflects observed state, so it
    /// assigns directly instead of going through transition validation.
    fn reconcile(
        &self,
        spec: &ServiceSpec,
        record: &mut InstanceRecord,
    ) -> Result<(), CoreError> {
        let status = self.backend.status(spec)?;
        match (record.state, status.running) {
            (InstanceState::Starting | InstanceState::Running | InstanceState::Unhealthy, false) => {
                warn!(
                    "instance '{}' recorded {} but container is gone, marking failed",
                    record.name, record.state
                );
                record.state = InstanceState::Failed;
                record.container_id = None;
                record.started_at = None;
                self.persist(record)?;
            }
            (InstanceState::Stopping, false) => {
                record.state = InstanceState::Stopped;
                record.container_id = None;
                record.started_at = None;
                self.persist(record)?;
            }
            (InstanceState::Stopped | InstanceState::Failed, true) => {
                warn!(
                    "instance '{}' recorded {} but container is running, adopting it",
                    record.name, record.state
                );
                record.state = InstanceState::Running;
                record.container_id = status.container_id;
                self.persist(record)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Best-effort teardown after a cancellation request. The record lands
    /// on whichever of Stopped/Failed matches the last confirmed backend
    /// state.
    fn cancel(&self, operation: &str, spec: &ServiceSpec, record: &mut InstanceRecord) -> CoreError {
        warn!("{operation} of '{}' cancelled, tearing down", record.name);
        let _ = self.backend.kill(spec);
        let still_running = self
            .backend
            .status(spec)
            .map(|s| s.running)
            .unwrap_or(true);
        record.state = if still_running {
            InstanceState::Failed
        } else {
            record.container_id = None;
            record.started_at = None;
            InstanceState::Stopped
        };
        if let Err(e) = self.persist(record) {
            return e;
        }
        CoreError::Cancelled {
            operation: operation.to_owned(),
        }
    }

    fn transition(
        &self,
        record: &mut InstanceRecord,
        to: InstanceState,
    ) -> Result<(), CoreError> {
        validate_transition(record.state, to)?;
        record.state = to;
        self.persist(record)
    }

    fn persist(&self, record: &mut InstanceRecord) -> Result<(), CoreError> {
        record.updated_at = chrono::Utc::now().to_rfc3339();
        self.instances.put(record)?;
        Ok(())
    }
}
