pub mod backup;
pub mod completions;
pub mod doctor;
pub mod list;
pub mod profiles;
pub mod prune;
pub mod restart;
pub mod restore;
pub mod show;
pub mod start;
pub mod status;
pub mod stop;
pub mod watch;

use deploy_core::CoreError;
use deploy_profile::{OverrideMap, ResolvedConfig};
use deploy_store::{StateLayout, StateLock, StoreError};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_UNKNOWN_INSTANCE: u8 = 2;
pub const EXIT_PROFILE_ERROR: u8 = 3;
pub const EXIT_PRECONDITION: u8 = 4;

/// Profile sections that may be overridden via `DEPLOY_<SECTION>_<FIELD>`
/// environment variables.
const OVERRIDE_SECTIONS: &[&str] = &[
    "service", "memory", "logging", "network", "security", "features", "health", "backup",
    "runtime",
];

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

/// Map `DEPLOY_MEMORY_HEAP_MAX=2G`-style variables to dotted override keys.
/// Variables that do not name a known profile section are ignored, which
/// keeps `DEPLOY_LOG` (the log filter) out of the override map.
pub fn env_overrides(vars: impl Iterator<Item = (String, String)>) -> OverrideMap {
    let mut map = OverrideMap::new();
    for (key, value) in vars {
        let Some(rest) = key.strip_prefix("DEPLOY_") else {
            continue;
        };
        for section in OVERRIDE_SECTIONS {
            let prefix = format!("{}_", section.to_uppercase());
            if let Some(field) = rest.strip_prefix(prefix.as_str()) {
                if !field.is_empty() {
                    map.insert(
                        format!("{section}.{}", field.to_lowercase()),
                        value.clone(),
                    );
                }
                break;
            }
        }
    }
    map
}

/// Merge environment overrides with `--override` flags; flags win.
pub fn collect_overrides(cli_overrides: &[String]) -> Result<OverrideMap, String> {
    let mut map = env_overrides(std::env::vars());
    for spec in cli_overrides {
        let (key, value) =
            deploy_profile::parse_override(spec).map_err(|e| format!("profile error: {e}"))?;
        map.insert(key, value);
    }
    Ok(map)
}

pub fn resolve_config(
    store_path: &Path,
    name: &str,
    cli_overrides: &[String],
) -> Result<ResolvedConfig, String> {
    let overrides = collect_overrides(cli_overrides)?;
    let layout = StateLayout::new(store_path);
    deploy_profile::resolve(name, Some(&layout.profiles_dir()), &overrides)
        .map_err(|e| format!("profile error: {e}"))
}

/// Serialize mutating commands against the state directory. The lock is held
/// for the whole command, spanning stop-then-start sequences.
pub fn lock_store(layout: &StateLayout) -> Result<StateLock, String> {
    layout
        .initialize()
        .map_err(|e| format!("store error: {e}"))?;
    StateLock::acquire(layout).map_err(|e| format!("store lock: {e}"))
}

/// Render a core error with the prefix that selects its exit code class.
pub fn describe(e: &CoreError) -> String {
    match e {
        CoreError::Profile(inner) => format!("profile error: {inner}"),
        CoreError::Store(StoreError::InstanceNotFound(name)) => {
            format!("unknown instance '{name}'")
        }
        CoreError::AlreadyRunning(_)
        | CoreError::InstanceNotRunning(_)
        | CoreError::InstanceMustBeStopped(_) => format!("precondition: {e}"),
        CoreError::StartTimeout { logs, .. } if !logs.trim().is_empty() => {
            format!("{e}\nlast container output:\n{}", logs.trim_end())
        }
        _ => e.to_string(),
    }
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_state(state: &str) -> String {
    use console::Style;
    match state {
        "running" => Style::new().cyan().bold().apply_to(state).to_string(),
        "starting" | "stopping" => Style::new().yellow().apply_to(state).to_string(),
        "unhealthy" => Style::new().red().apply_to(state).to_string(),
        "failed" => Style::new().red().bold().apply_to(state).to_string(),
        "stopped" => Style::new().dim().apply_to(state).to_string(),
        other => other.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_pretty_serializes_string() {
        let val = serde_json::json!({"key": "value"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"key\""));
        assert!(result.contains("\"value\""));
    }

    #[test]
    fn colorize_state_running() {
        assert!(colorize_state("running").contains("running"));
    }

    #[test]
    fn colorize_state_failed() {
        assert!(colorize_state("failed").contains("failed"));
    }

    #[test]
    fn colorize_state_unknown_passthrough() {
        assert_eq!(colorize_state("weird"), "weird");
    }

    #[test]
    fn exit_codes_are_distinct() {
        let codes = [
            EXIT_SUCCESS,
            EXIT_FAILURE,
            EXIT_UNKNOWN_INSTANCE,
            EXIT_PROFILE_ERROR,
            EXIT_PRECONDITION,
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn env_overrides_maps_sections() {
        let vars = vec![
            ("DEPLOY_MEMORY_HEAP_MAX".to_owned(), "2G".to_owned()),
            ("DEPLOY_NETWORK_BOLT_PORT".to_owned(), "7999".to_owned()),
        ];
        let map = env_overrides(vars.into_iter());
        assert_eq!(map.get("memory.heap_max").unwrap(), "2G");
        assert_eq!(map.get("network.bolt_port").unwrap(), "7999");
    }

    #[test]
    fn env_overrides_ignores_log_filter_and_foreign_vars() {
        let vars = vec![
            ("DEPLOY_LOG".to_owned(), "debug".to_owned()),
            ("PATH".to_owned(), "/usr/bin".to_owned()),
            ("DEPLOY_NONSENSE_FIELD".to_owned(), "x".to_owned()),
        ];
        let map = env_overrides(vars.into_iter());
        assert!(map.is_empty());
    }

    #[test]
    fn describe_prefixes_unknown_instance() {
        let err = CoreError::Store(StoreError::InstanceNotFound("dev".to_owned()));
        assert!(describe(&err).starts_with("unknown instance"));
    }

    #[test]
    fn describe_prefixes_preconditions() {
        let err = CoreError::AlreadyRunning("dev".to_owned());
        assert!(describe(&err).starts_with("precondition:"));
    }

    #[test]
    fn describe_start_timeout_appends_log_tail() {
        let err = CoreError::StartTimeout {
            name: "dev".to_owned(),
            waited_secs: 3,
            last: deploy_runtime::HealthState::Unreachable,
            logs: "OOM: heap exhausted\n".to_owned(),
        };
        let msg = describe(&err);
        assert!(msg.contains("did not become healthy"));
        assert!(msg.contains("OOM: heap exhausted"));
    }

    #[test]
    fn describe_start_timeout_without_logs_stays_single_line() {
        let err = CoreError::StartTimeout {
            name: "dev".to_owned(),
            waited_secs: 3,
            last: deploy_runtime::HealthState::Unreachable,
            logs: String::new(),
        };
        assert!(!describe(&err).contains('\n'));
    }
}
