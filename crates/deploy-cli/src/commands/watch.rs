use super::{colorize_state, describe, json_pretty, resolve_config, EXIT_FAILURE, EXIT_SUCCESS};
use deploy_core::{shutdown_requested, Controller};
use deploy_store::StateLayout;
use std::path::Path;
use std::time::Duration;

/// Supervision loop: tick the health check at the profile's interval until
/// the instance leaves the active states, the failure budget is exhausted,
/// or Ctrl-C.
pub fn run(
    store_path: &Path,
    env: &str,
    overrides: &[String],
    json: bool,
) -> Result<u8, String> {
    let config = resolve_config(store_path, env, overrides)?;
    let layout = StateLayout::new(store_path);
    layout
        .initialize()
        .map_err(|e| format!("store error: {e}"))?;
    let controller = Controller::for_config(layout, &config).map_err(|e| describe(&e))?;

    let interval = Duration::from_secs(config.check_interval_secs);
    loop {
        if shutdown_requested() {
            return Ok(EXIT_SUCCESS);
        }
        let outcome = controller.check(&config).map_err(|e| describe(&e))?;
        if json {
            println!("{}", json_pretty(&outcome)?);
        } else {
            println!(
                "{:<10} {}",
                colorize_state(&outcome.state.to_string()),
                outcome.health
            );
        }
        if outcome.gave_up {
            eprintln!("instance '{env}' exhausted its failure budget and was stopped");
            return Ok(EXIT_FAILURE);
        }
        if !outcome.state.is_active() {
            return Ok(EXIT_SUCCESS);
        }

        // Sleep in short slices so Ctrl-C lands promptly.
        let mut remaining = interval;
        while !remaining.is_zero() {
            if shutdown_requested() {
                return Ok(EXIT_SUCCESS);
            }
            let step = remaining.min(Duration::from_millis(200));
            std::thread::sleep(step);
            remaining -= step;
        }
    }
}
