//! Service backends and health probing for deployctl.
//!
//! This crate implements the execution layer: the pluggable `ServiceBackend`
//! trait with a docker backend (shelling out to the `docker` binary) and a
//! mock backend for tests, plus the three-stage health prober (TCP
//! reachability, HTTP status endpoint, protocol-level query). The database
//! engine and the container runtime themselves are external collaborators;
//! nothing here reimplements them.

pub mod backend;
pub mod docker;
pub mod health;
pub mod mock;

pub use backend::{select_backend, BackendStatus, ServiceBackend, ServiceSpec};
pub use docker::DockerBackend;
pub use health::{EndpointProber, HealthProbe, HealthState, QueryProber};
pub use mock::{MockBackend, MockProbe};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend '{0}' is not available on this system")]
    BackendUnavailable(String),
    #[error("unknown backend: {0}")]
    UnknownBackend(String),
    #[error("instance '{0}' is not running")]
    NotRunning(String),
    #[error("instance '{0}' is already running")]
    AlreadyRunning(String),
    #[error("command failed: {command}: {stderr}")]
    CommandFailed { command: String, stderr: String },
    #[error("interrupted: {0}")]
    Interrupted(String),
    #[error("protocol probe failed: {0}")]
    ProbeFailed(String),
}
