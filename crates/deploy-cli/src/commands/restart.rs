use super::{describe, json_pretty, lock_store, resolve_config, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use deploy_core::Controller;
use deploy_store::StateLayout;
use std::path::Path;

pub fn run(
    store_path: &Path,
    env: &str,
    overrides: &[String],
    json: bool,
) -> Result<u8, String> {
    let config = resolve_config(store_path, env, overrides)?;
    let layout = StateLayout::new(store_path);
    let _lock = lock_store(&layout)?;
    let controller = Controller::for_config(layout, &config).map_err(|e| describe(&e))?;

    let pb = (!json).then(|| spinner(&format!("restarting instance '{env}'...")));
    match controller.restart(&config) {
        Ok(record) => {
            if let Some(pb) = &pb {
                spin_ok(pb, &format!("instance '{env}' is running and healthy"));
            }
            if json {
                println!("{}", json_pretty(&record)?);
            }
            Ok(EXIT_SUCCESS)
        }
        Err(e) => {
            if let Some(pb) = &pb {
                spin_fail(pb, &format!("failed to restart instance '{env}'"));
            }
            Err(describe(&e))
        }
    }
}
