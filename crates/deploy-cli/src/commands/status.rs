use super::{
    colorize_state, describe, json_pretty, resolve_config, EXIT_FAILURE, EXIT_PRECONDITION,
    EXIT_SUCCESS,
};
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
    layout
        .initialize()
        .map_err(|e| format!("store error: {e}"))?;
    let controller = Controller::for_config(layout, &config).map_err(|e| describe(&e))?;

    let report = controller.status(&config).map_err(|e| describe(&e))?;
    if json {
        println!("{}", json_pretty(&report)?);
    } else {
        let record = &report.record;
        println!("instance:  {}", record.name);
        println!("state:     {}", colorize_state(&record.state.to_string()));
        if let Some(id) = &record.container_id {
            println!("container: {id}");
        }
        if let Some(ts) = &record.started_at {
            println!("started:   {ts}");
        }
        if let Some(health) = &report.health {
            println!("health:    {health}");
        }
    }

    // Only a probed-healthy instance exits 0; an active instance failing
    // its probe exits 1, and a known-but-inactive one exits 4 so scripts
    // can tell Stopped from Healthy.
    match &report.health {
        Some(health) if health.is_healthy() => Ok(EXIT_SUCCESS),
        Some(_) => Ok(EXIT_FAILURE),
        None => Ok(EXIT_PRECONDITION),
    }
}
