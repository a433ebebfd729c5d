use super::{describe, json_pretty, lock_store, resolve_config, EXIT_SUCCESS};
use deploy_core::Controller;
use deploy_store::StateLayout;
use std::path::Path;

pub fn run(
    store_path: &Path,
    env: &str,
    force: bool,
    overrides: &[String],
    json: bool,
) -> Result<u8, String> {
    let config = resolve_config(store_path, env, overrides)?;
    let layout = StateLayout::new(store_path);
    let _lock = lock_store(&layout)?;
    let controller = Controller::for_config(layout, &config).map_err(|e| describe(&e))?;

    let record = controller.stop(&config, force).map_err(|e| describe(&e))?;
    if json {
        println!("{}", json_pretty(&record)?);
    } else {
        println!("stopped instance '{env}'");
    }
    Ok(EXIT_SUCCESS)
}
