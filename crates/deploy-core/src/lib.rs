//! Core orchestration for deployctl instance lifecycle.
//!
//! This crate ties together profile resolution, the state store, and runtime
//! backends into the `Controller` — start/stop/restart with health-verified
//! transitions and bounded waits — and the `BackupManager` for dump/load and
//! retention. It also provides state-machine transition validation and
//! cooperative Ctrl-C cancellation.

pub mod backup;
pub mod concurrency;
pub mod controller;
pub mod lifecycle;

pub use backup::BackupManager;
pub use concurrency::{install_signal_handler, shutdown_requested};
pub use controller::{CheckOutcome, Controller, PollSettings, StatusReport};
pub use lifecycle::validate_transition;

use deploy_runtime::HealthState;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("profile error: {0}")]
    Profile(#[from] deploy_profile::ProfileError),
    #[error("state error: {0}")]
    Store(#[from] deploy_store::StoreError),
    #[error("runtime error: {0}")]
    Runtime(#[from] deploy_runtime::RuntimeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("instance '{0}' is already running")]
    AlreadyRunning(String),
    #[error("instance '{0}' is not running")]
    InstanceNotRunning(String),
    #[error("instance '{0}' must be stopped first")]
    InstanceMustBeStopped(String),
    #[error("instance '{name}' did not become healthy within {waited_secs}s (last probe: {last})")]
    StartTimeout {
        name: String,
        waited_secs: u64,
        last: HealthState,
        logs: String,
    },
    #[error("instance '{name}' did not exit within {waited_secs}s drain timeout")]
    StopTimeout { name: String, waited_secs: u64 },
    #[error("restart failed: {0}")]
    RestartFailed(String),
    #[error("{operation} cancelled")]
    Cancelled { operation: String },
    #[error("backup '{id}' failed: {diagnostic}")]
    BackupFailed { id: String, diagnostic: String },
    #[error("restore failed: {0}")]
    RestoreFailed(String),
}
