use super::{json_pretty, EXIT_FAILURE, EXIT_SUCCESS};
use deploy_runtime::select_backend;
use deploy_store::{BackupStatus, BackupStore, InstanceStore, StateLayout, StateLock};
use std::path::Path;

pub fn run(store_path: &Path, json_output: bool) -> Result<u8, String> {
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    check_docker(&mut checks);

    let layout = StateLayout::new(store_path);
    if store_path.join("state").exists() {
        checks.push(Check::pass("store_exists", "State directory exists"));
        check_store(&layout, &mut checks, &mut all_pass);
    } else {
        checks.push(Check::info(
            "store_exists",
            "State directory not initialized (will be created on first start)",
        ));
    }

    print_results(&checks, all_pass, json_output)
}

fn check_docker(checks: &mut Vec<Check>) {
    // Missing docker is a warning, not a failure: the mock backend and
    // read-only commands work without it.
    match select_backend("docker") {
        Ok(backend) if backend.available() => {
            checks.push(Check::pass("docker", "Docker runtime available"));
        }
        Ok(_) => checks.push(Check::warn(
            "docker",
            "docker binary not found or not responding",
        )),
        Err(e) => checks.push(Check::warn(
            "docker",
            &format!("Cannot construct docker backend: {e}"),
        )),
    }
}

fn check_store(layout: &StateLayout, checks: &mut Vec<Check>, all_pass: &mut bool) {
    // Version
    match layout.initialize() {
        Ok(()) => checks.push(Check::pass("store_version", "State format version valid")),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "store_version",
                &format!("State version check failed: {e}"),
            ));
        }
    }

    // Lock
    match StateLock::try_acquire(layout) {
        Ok(Some(_)) => checks.push(Check::pass("store_lock", "State lock is free")),
        Ok(None) => {
            let holder = StateLock::holder(layout)
                .map(|pid| format!(" (pid {pid})"))
                .unwrap_or_default();
            checks.push(Check::warn(
                "store_lock",
                &format!("State lock is held by another process{holder}"),
            ));
        }
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "store_lock",
                &format!("Cannot check state lock: {e}"),
            ));
        }
    }

    // Instances (get() verifies the blake3 checksum of each record)
    let instances = InstanceStore::new(layout.clone());
    match instances.list() {
        Ok(records) => {
            let active = records.iter().filter(|r| r.state.is_active()).count();
            checks.push(Check::info(
                "instances",
                &format!("{} instances ({active} active)", records.len()),
            ));
        }
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "instances",
                &format!("Cannot read instance records: {e}"),
            ));
        }
    }

    // Backups
    let backups = BackupStore::new(layout.clone());
    match backups.list() {
        Ok(records) => {
            let pending = records
                .iter()
                .filter(|r| r.status == BackupStatus::Pending)
                .count();
            let missing = records
                .iter()
                .filter(|r| {
                    r.status == BackupStatus::Complete && !Path::new(&r.path).is_file()
                })
                .count();
            if missing > 0 {
                *all_pass = false;
                checks.push(Check::fail(
                    "backups",
                    &format!("{missing} backup records point at missing artifacts"),
                ));
            } else if pending > 0 {
                checks.push(Check::warn(
                    "backups",
                    &format!(
                        "{} backups, {pending} still pending (crashed dump?)",
                        records.len()
                    ),
                ));
            } else {
                checks.push(Check::info(
                    "backups",
                    &format!("{} backups, all finalized", records.len()),
                ));
            }
        }
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "backups",
                &format!("Cannot read backup records: {e}"),
            ));
        }
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, String> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks.iter().map(|c| serde_json::json!({
                "name": c.name,
                "status": c.status,
                "message": c.message,
            })).collect::<Vec<_>>(),
        });
        println!("{}", json_pretty(&json)?);
    } else {
        println!("Deployctl Doctor\n");
        for check in checks {
            let icon = match check.status.as_str() {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

struct Check {
    name: String,
    status: String,
    message: String,
}

impl Check {
    fn pass(name: &str, message: &str) -> Self {
        Self::with_status(name, "pass", message)
    }

    fn fail(name: &str, message: &str) -> Self {
        Self::with_status(name, "fail", message)
    }

    fn warn(name: &str, message: &str) -> Self {
        Self::with_status(name, "warn", message)
    }

    fn info(name: &str, message: &str) -> Self {
        Self::with_status(name, "info", message)
    }

    fn with_status(name: &str, status: &str, message: &str) -> Self {
        Self {
            name: name.to_owned(),
            status: status.to_owned(),
            message: message.to_owned(),
        }
    }
}
