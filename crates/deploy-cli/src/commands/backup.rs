use super::{describe, json_pretty, lock_store, resolve_config, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use deploy_core::BackupManager;
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
    let manager = BackupManager::for_config(layout, &config).map_err(|e| describe(&e))?;

    let pb = (!json).then(|| spinner(&format!("backing up instance '{env}'...")));
    match manager.backup(&config) {
        Ok(record) => {
            if let Some(pb) = &pb {
                spin_ok(
                    pb,
                    &format!("backup '{}' complete ({} bytes)", record.id, record.size_bytes),
                );
                println!("{}", record.path);
            }
            if json {
                println!("{}", json_pretty(&record)?);
            }
            Ok(EXIT_SUCCESS)
        }
        Err(e) => {
            if let Some(pb) = &pb {
                spin_fail(pb, &format!("backup of instance '{env}' failed"));
            }
            Err(describe(&e))
        }
    }
}
