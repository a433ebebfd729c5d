use crate::RuntimeError;
use deploy_profile::ResolvedConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Everything a backend needs to manage one service instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceSpec {
    /// Instance name (the profile name).
    pub name: String,
    /// Container name the backend manages, `deploy-<name>`.
    pub container_name: String,
    pub config: ResolvedConfig,
}

impl ServiceSpec {
    pub fn new(config: &ResolvedConfig) -> Self {
        Self {
            name: config.name.clone(),
            container_name: format!("deploy-{}", config.name),
            config: config.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendStatus {
    pub name: String,
    pub running: bool,
    pub container_id: Option<String>,
}

/// Control surface of the managed service.
///
/// Backends spawn, signal, and wait on the external process/container and
/// invoke its native dump/load and query facilities. They never track
/// lifecycle state themselves; that belongs to the controller.
pub trait ServiceBackend: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    /// Launch the service detached. Returns the container/process id.
    fn launch(&self, spec: &ServiceSpec) -> Result<String, RuntimeError>;

    /// Ask the service to shut down cleanly. Non-blocking: callers poll
    /// [`status`](Self::status) for the actual exit.
    fn signal_stop(&self, spec: &ServiceSpec) -> Result<(), RuntimeError>;

    /// Terminate the service immediately.
    fn kill(&self, spec: &ServiceSpec) -> Result<(), RuntimeError>;

    fn status(&self, spec: &ServiceSpec) -> Result<BackendStatus, RuntimeError>;

    /// Invoke the service's native dump facility, writing to `dest`.
    /// Captured diagnostics surface in the error on failure. `should_stop`
    /// is polled while the dump runs; when it reports true the dump is
    /// killed and `Interrupted` returned.
    fn dump(
        &self,
        spec: &ServiceSpec,
        dest: &Path,
        should_stop: &dyn Fn() -> bool,
    ) -> Result<(), RuntimeError>;

    /// Invoke the service's native load facility from `source`. Destructive;
    /// the controller only calls this against a stopped instance.
    fn load(&self, spec: &ServiceSpec, source: &Path) -> Result<(), RuntimeError>;

    /// Execute a trivial query against the live service and return its
    /// literal result, for the protocol-level health stage.
    fn probe_query(&self, spec: &ServiceSpec) -> Result<String, RuntimeError>;

    /// Last `lines` of service output, for start-failure diagnostics.
    fn tail_logs(&self, spec: &ServiceSpec, lines: u32) -> Result<String, RuntimeError>;
}

pub fn select_backend(name: &str) -> Result<Arc<dyn ServiceBackend>, RuntimeError> {
    match name {
        "docker" => Ok(Arc::new(crate::docker::DockerBackend::new())),
        "mock" => Ok(Arc::new(crate::mock::MockBackend::new())),
        other => Err(RuntimeError::UnknownBackend(other.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deploy_profile::resolve;
    use std::collections::BTreeMap;

    #[test]
    fn select_valid_backends() {
        assert!(select_backend("docker").is_ok());
        assert!(select_backend("mock").is_ok());
    }

    #[test]
    fn select_invalid_backend_fails() {
        assert!(matches!(
            select_backend("podman"),
            Err(RuntimeError::UnknownBackend(_))
        ));
    }

    #[test]
    fn spec_derives_container_name() {
        let config = resolve("dev", None, &BTreeMap::new()).unwrap();
        let spec = ServiceSpec::new(&config);
        assert_eq!(spec.name, "dev");
        assert_eq!(spec.container_name, "deploy-dev");
    }
}
