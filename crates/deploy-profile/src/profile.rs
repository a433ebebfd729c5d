use crate::ProfileError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Edition {
    #[default]
    Community,
    Enterprise,
}

impl std::fmt::Display for Edition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Edition::Community => write!(f, "community"),
            Edition::Enterprise => write!(f, "enterprise"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    pub profile_version: u32,
    #[serde(default)]
    pub service: ServiceSection,
    #[serde(default)]
    pub memory: MemorySection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub network: NetworkSection,
    pub security: SecuritySection,
    #[serde(default)]
    pub features: FeaturesSection,
    #[serde(default)]
    pub health: HealthSection,
    #[serde(default)]
    pub backup: BackupSection,
    #[serde(default)]
    pub runtime: RuntimeSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServiceSection {
    #[serde(default)]
    pub edition: Edition,
    #[serde(default = "default_image")]
    pub image: String,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            edition: Edition::default(),
            image: default_image(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MemorySection {
    #[serde(default = "default_heap_initial")]
    pub heap_initial: String,
    #[serde(default = "default_heap_max")]
    pub heap_max: String,
    #[serde(default = "default_page_cache")]
    pub page_cache: String,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            heap_initial: default_heap_initial(),
            heap_max: default_heap_max(),
            page_cache: default_page_cache(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct NetworkSection {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_https_port")]
    pub https_port: u16,
    #[serde(default = "default_bolt_port")]
    pub bolt_port: u16,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            http_port: default_http_port(),
            https_port: default_https_port(),
            bolt_port: default_bolt_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SecuritySection {
    pub password: String,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub cert_path: Option<String>,
    #[serde(default)]
    pub key_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FeaturesSection {
    #[serde(default)]
    pub proxy: bool,
    #[serde(default = "default_proxy_port")]
    pub proxy_port: u16,
    #[serde(default)]
    pub monitoring: bool,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

impl Default for FeaturesSection {
    fn default() -> Self {
        Self {
            proxy: false,
            proxy_port: default_proxy_port(),
            monitoring: false,
            metrics_port: default_metrics_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HealthSection {
    #[serde(default = "default_start_timeout")]
    pub start_timeout_secs: u64,
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            start_timeout_secs: default_start_timeout(),
            drain_timeout_secs: default_drain_timeout(),
            check_interval_secs: default_check_interval(),
            max_consecutive_failures: default_max_failures(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BackupSection {
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_retention_count")]
    pub retention_count: u32,
}

impl Default for BackupSection {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            retention_count: default_retention_count(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RuntimeSection {
    #[serde(default = "default_backend")]
    pub backend: String,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
        }
    }
}

fn default_image() -> String {
    "neo4j:5".to_owned()
}

fn default_heap_initial() -> String {
    "512M".to_owned()
}

fn default_heap_max() -> String {
    "1G".to_owned()
}

fn default_page_cache() -> String {
    "512M".to_owned()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_owned()
}

fn default_http_port() -> u16 {
    7474
}

fn default_https_port() -> u16 {
    7473
}

fn default_bolt_port() -> u16 {
    7687
}

fn default_proxy_port() -> u16 {
    8080
}

fn default_metrics_port() -> u16 {
    2004
}

fn default_start_timeout() -> u64 {
    120
}

fn default_drain_timeout() -> u64 {
    60
}

fn default_check_interval() -> u64 {
    30
}

fn default_max_failures() -> u32 {
    3
}

fn default_probe_timeout() -> u64 {
    2
}

fn default_retention_days() -> u32 {
    7
}

fn default_retention_count() -> u32 {
    10
}

fn default_backend() -> String {
    "docker".to_owned()
}

pub fn parse_profile_str(input: &str) -> Result<Profile, ProfileError> {
    let profile: Profile = toml::from_str(input)?;
    if profile.profile_version != 1 {
        return Err(ProfileError::UnsupportedVersion(profile.profile_version));
    }
    Ok(profile)
}

pub fn parse_profile_file(path: impl AsRef<Path>) -> Result<Profile, ProfileError> {
    let content = fs::read_to_string(path)?;
    parse_profile_str(&content)
}
