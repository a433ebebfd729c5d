use super::{describe, json_pretty, lock_store, resolve_config, EXIT_SUCCESS};
use deploy_core::BackupManager;
use deploy_store::StateLayout;
use std::path::Path;

pub fn run(
    store_path: &Path,
    env: &str,
    from: &Path,
    overrides: &[String],
    json: bool,
) -> Result<u8, String> {
    let config = resolve_config(store_path, env, overrides)?;
    let layout = StateLayout::new(store_path);
    let _lock = lock_store(&layout)?;
    let manager = BackupManager::for_config(layout, &config).map_err(|e| describe(&e))?;

    manager.restore(&config, from).map_err(|e| describe(&e))?;
    if json {
        let payload = serde_json::json!({
            "instance": env,
            "restored_from": from.display().to_string(),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("restored instance '{env}' from {}", from.display());
        println!("run `deploy start --env {env}` to bring it back up");
    }
    Ok(EXIT_SUCCESS)
}
