//! Profile parsing and resolution for deployctl deployment environments.
//!
//! A profile is a named TOML document describing one deployment environment
//! (edition, memory sizing, network ports, security, feature flags). This
//! crate parses profiles, layers built-in defaults, the named profile file,
//! and an explicit override map into a fully concrete [`ResolvedConfig`],
//! and validates the result (size units, port uniqueness). Resolution is a
//! pure function over its inputs; nothing here reads the live environment.

pub mod preset;
pub mod profile;
pub mod resolve;
pub mod size;

pub use preset::{find_preset, Preset, BUILTIN_PRESETS};
pub use profile::{parse_profile_str, Edition, LogLevel, Profile};
pub use resolve::{parse_override, resolve, OverrideMap, ResolvedConfig};
pub use size::parse_size;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("failed to read profile file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse profile: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("unsupported profile_version: {0}, expected 1")]
    UnsupportedVersion(u32),
    #[error("profile not found: '{0}' (no profile file and no built-in preset)")]
    NotFound(String),
    #[error("invalid size for {field}: '{value}' (expected e.g. \"512M\", \"2G\")")]
    InvalidSize { field: String, value: String },
    #[error("invalid override '{0}', expected 'section.field=value'")]
    InvalidOverride(String),
    #[error("security.password must not be empty")]
    EmptyPassword,
    #[error("security.tls = true requires cert_path and key_path")]
    TlsRequiresCertificates,
    #[error("port {port} is bound by both '{first}' and '{second}'")]
    PortConflict {
        port: u16,
        first: String,
        second: String,
    },
    #[error("profile validation failed: {0}")]
    Validation(String),
}
