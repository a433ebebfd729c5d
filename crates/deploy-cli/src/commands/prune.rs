use super::{describe, json_pretty, lock_store, resolve_config, EXIT_SUCCESS};
use deploy_core::BackupManager;
use deploy_store::StateLayout;
use std::path::Path;

pub fn run(
    store_path: &Path,
    env: &str,
    dry_run: bool,
    overrides: &[String],
    json: bool,
) -> Result<u8, String> {
    let config = resolve_config(store_path, env, overrides)?;
    let layout = StateLayout::new(store_path);
    let _lock = lock_store(&layout)?;
    let manager = BackupManager::for_config(layout, &config).map_err(|e| describe(&e))?;

    let report = manager.prune(&config, dry_run).map_err(|e| describe(&e))?;
    if json {
        let payload = serde_json::json!({
            "instance": env,
            "dry_run": dry_run,
            "expired": report.expired,
            "over_cap": report.over_cap,
            "removed": report.removed,
            "skipped_pending": report.skipped_pending,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        let prefix = if dry_run { "would remove" } else { "removed" };
        println!(
            "prune: {prefix} {} backups ({} expired, {} over cap), {} pending skipped",
            report.expired.len() + report.over_cap.len(),
            report.expired.len(),
            report.over_cap.len(),
            report.skipped_pending
        );
        if dry_run {
            for id in report.expired.iter().chain(report.over_cap.iter()) {
                println!("  {id}");
            }
        }
    }
    Ok(EXIT_SUCCESS)
}
