//! Cooperative Ctrl-C handling for long-running deploy operations.
//!
//! The first interrupt sets a process-wide flag that the controller's wait
//! loops, the backup path, and the retention sweeper poll between steps so
//! they can tear down and surface `Cancelled`. A second interrupt aborts
//! the process outright.

use std::sync::atomic::{AtomicBool, Ordering};

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            std::process::exit(1);
        }
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        eprintln!(
            "\ninterrupt received, winding down the current deploy step (press again to abort)"
        );
    });
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}
