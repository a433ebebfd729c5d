use crate::profile::{parse_profile_str, Edition, LogLevel, Profile};
use crate::size::parse_size;
use crate::{find_preset, ProfileError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Explicit override map keyed by dotted profile path, e.g.
/// `memory.heap_max` -> `2G`. Highest-precedence resolution layer.
pub type OverrideMap = BTreeMap<String, String>;

/// Fully concrete configuration produced by [`resolve`].
///
/// All memory fields are in bytes, all enabled ports are pairwise distinct,
/// and every field has a definite value. Immutable by convention: the
/// controller and backends only ever read it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub name: String,
    pub edition: Edition,
    pub image: String,
    pub heap_initial_bytes: u64,
    pub heap_max_bytes: u64,
    pub page_cache_bytes: u64,
    pub log_level: LogLevel,
    pub bind_address: String,
    pub http_port: u16,
    pub https_port: u16,
    pub bolt_port: u16,
    pub password: String,
    pub tls: bool,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
    pub proxy: bool,
    pub proxy_port: u16,
    pub monitoring: bool,
    pub metrics_port: u16,
    pub start_timeout_secs: u64,
    pub drain_timeout_secs: u64,
    pub check_interval_secs: u64,
    pub max_consecutive_failures: u32,
    pub probe_timeout_secs: u64,
    pub retention_days: u32,
    pub retention_count: u32,
    pub backend: String,
}

impl ResolvedConfig {
    /// All network endpoints enabled by this configuration, as
    /// (endpoint name, port) pairs. The https endpoint only exists when TLS
    /// is on; proxy and metrics ports only when their feature flag is set.
    pub fn enabled_ports(&self) -> Vec<(&'static str, u16)> {
        let mut ports = vec![
            ("network.bolt_port", self.bolt_port),
            ("network.http_port", self.http_port),
        ];
        if self.tls {
            ports.push(("network.https_port", self.https_port));
        }
        if self.proxy {
            ports.push(("features.proxy_port", self.proxy_port));
        }
        if self.monitoring {
            ports.push(("features.metrics_port", self.metrics_port));
        }
        ports
    }
}

/// Parse a `section.field=value` CLI override into a map entry.
pub fn parse_override(spec: &str) -> Result<(String, String), ProfileError> {
    let (key, value) = spec
        .split_once('=')
        .ok_or_else(|| ProfileError::InvalidOverride(spec.to_owned()))?;
    let key = key.trim();
    if key.is_empty() || !key.contains('.') {
        return Err(ProfileError::InvalidOverride(spec.to_owned()));
    }
    Ok((key.to_owned(), value.trim().to_owned()))
}

/// Resolve a named profile into a concrete configuration.
///
/// Layering, lowest to highest precedence: built-in field defaults, the
/// profile document (a `<name>.toml` file under `profiles_dir` if present,
/// else the built-in preset of that name), then `overrides`. Pure over its
/// inputs; deterministic for identical inputs.
pub fn resolve(
    name: &str,
    profiles_dir: Option<&Path>,
    overrides: &OverrideMap,
) -> Result<ResolvedConfig, ProfileError> {
    let text = load_profile_text(name, profiles_dir)?;
    resolve_from_str(name, &text, overrides)
}

/// Resolve from profile TOML text directly. Used by [`resolve`] and by tests
/// that construct profiles inline.
pub fn resolve_from_str(
    name: &str,
    profile_text: &str,
    overrides: &OverrideMap,
) -> Result<ResolvedConfig, ProfileError> {
    let profile = if overrides.is_empty() {
        parse_profile_str(profile_text)?
    } else {
        let mut table: toml::Table = toml::from_str(profile_text)?;
        for (key, value) in overrides {
            apply_override(&mut table, key, value)?;
        }
        let merged = toml::to_string(&table)
            .map_err(|e| ProfileError::Validation(format!("override merge failed: {e}")))?;
        parse_profile_str(&merged)?
    };
    validate(name, &profile)
}

fn load_profile_text(name: &str, profiles_dir: Option<&Path>) -> Result<String, ProfileError> {
    if let Some(dir) = profiles_dir {
        let path = dir.join(format!("{name}.toml"));
        if path.is_file() {
            return Ok(fs::read_to_string(path)?);
        }
    }
    find_preset(name)
        .map(|p| p.profile.to_owned())
        .ok_or_else(|| ProfileError::NotFound(name.to_owned()))
}

/// Set a dotted-path key inside the TOML table, coercing the string value to
/// integer or boolean where it parses as one. Intermediate tables are
/// created so an override can introduce a section the profile omitted.
fn apply_override(table: &mut toml::Table, key: &str, value: &str) -> Result<(), ProfileError> {
    let mut segments = key.split('.').peekable();
    let mut current = table;
    while let Some(segment) = segments.next() {
        if segment.is_empty() {
            return Err(ProfileError::InvalidOverride(format!("{key}={value}")));
        }
        if segments.peek().is_none() {
            current.insert(segment.to_owned(), coerce_value(value));
            return Ok(());
        }
        let entry = current
            .entry(segment.to_owned())
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        current = entry
            .as_table_mut()
            .ok_or_else(|| ProfileError::InvalidOverride(format!("{key}={value}")))?;
    }
    Err(ProfileError::InvalidOverride(format!("{key}={value}")))
}

fn coerce_value(value: &str) -> toml::Value {
    if let Ok(i) = value.parse::<i64>() {
        return toml::Value::Integer(i);
    }
    if let Ok(b) = value.parse::<bool>() {
        return toml::Value::Boolean(b);
    }
    toml::Value::String(value.to_owned())
}

fn validate(name: &str, profile: &Profile) -> Result<ResolvedConfig, ProfileError> {
    if profile.security.password.is_empty() {
        return Err(ProfileError::EmptyPassword);
    }
    if profile.security.tls
        && (profile.security.cert_path.is_none() || profile.security.key_path.is_none())
    {
        return Err(ProfileError::TlsRequiresCertificates);
    }
    if profile.network.bind_address.is_empty() {
        return Err(ProfileError::Validation(
            "network.bind_address must not be empty".to_owned(),
        ));
    }
    if profile.health.max_consecutive_failures == 0 {
        return Err(ProfileError::Validation(
            "health.max_consecutive_failures must be at least 1".to_owned(),
        ));
    }

    let config = ResolvedConfig {
        name: name.to_owned(),
        edition: profile.service.edition,
        image: profile.service.image.clone(),
        heap_initial_bytes: parse_size("memory.heap_initial", &profile.memory.heap_initial)?,
        heap_max_bytes: parse_size("memory.heap_max", &profile.memory.heap_max)?,
        page_cache_bytes: parse_size("memory.page_cache", &profile.memory.page_cache)?,
        log_level: profile.logging.level,
        bind_address: profile.network.bind_address.clone(),
        http_port: profile.network.http_port,
        https_port: profile.network.https_port,
        bolt_port: profile.network.bolt_port,
        password: profile.security.password.clone(),
        tls: profile.security.tls,
        cert_path: profile.security.cert_path.clone(),
        key_path: profile.security.key_path.clone(),
        proxy: profile.features.proxy,
        proxy_port: profile.features.proxy_port,
        monitoring: profile.features.monitoring,
        metrics_port: profile.features.metrics_port,
        start_timeout_secs: profile.health.start_timeout_secs,
        drain_timeout_secs: profile.health.drain_timeout_secs,
        check_interval_secs: profile.health.check_interval_secs,
        max_consecutive_failures: profile.health.max_consecutive_failures,
        probe_timeout_secs: profile.health.probe_timeout_secs,
        retention_days: profile.backup.retention_days,
        retention_count: profile.backup.retention_count,
        backend: profile.runtime.backend.clone(),
    };

    if config.heap_initial_bytes > config.heap_max_bytes {
        return Err(ProfileError::Validation(format!(
            "memory.heap_initial ({}) exceeds memory.heap_max ({})",
            config.heap_initial_bytes, config.heap_max_bytes
        )));
    }

    check_port_conflicts(&config)?;
    Ok(config)
}

fn check_port_conflicts(config: &ResolvedConfig) -> Result<(), ProfileError> {
    let ports = config.enabled_ports();
    for (i, (first, port)) in ports.iter().enumerate() {
        for (second, other) in &ports[i + 1..] {
            if port == other {
                return Err(ProfileError::PortConflict {
                    port: *port,
                    first: (*first).to_owned(),
                    second: (*second).to_owned(),
                });
            }
        }
    }
    Ok(())
}
