use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Preset {
    pub name: &'static str,
    pub description: &'static str,
    pub profile: &'static str,
}

pub const BUILTIN_PRESETS: &[Preset] = &[
    Preset {
        name: "dev",
        description: "Local development: small heap, debug logging, no TLS",
        profile: r#"profile_version = 1

[memory]
heap_initial = "256M"
heap_max = "1G"
page_cache = "256M"

[logging]
level = "debug"

[network]
bind_address = "127.0.0.1"

[security]
password = "dev_password_123"

[backup]
retention_days = 3
retention_count = 5
"#,
    },
    Preset {
        name: "staging",
        description: "Staging: production-like sizing with monitoring enabled",
        profile: r#"profile_version = 1

[memory]
heap_initial = "1G"
heap_max = "2G"
page_cache = "1G"

[logging]
level = "info"

[security]
password = "staging_password_change_me"

[features]
monitoring = true
"#,
    },
    Preset {
        name: "prod",
        description: "Production: enterprise edition, proxy and monitoring, warn logging",
        profile: r#"profile_version = 1

[service]
edition = "enterprise"

[memory]
heap_initial = "2G"
heap_max = "4G"
page_cache = "2G"

[logging]
level = "warn"

[security]
password = "prod_password_change_me"

[features]
proxy = true
monitoring = true

[health]
start_timeout_secs = 180

[backup]
retention_days = 30
retention_count = 30
"#,
    },
];

pub fn find_preset(name: &str) -> Option<&'static Preset> {
    BUILTIN_PRESETS.iter().find(|p| p.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::parse_profile_str;

    #[test]
    fn all_presets_parse() {
        for preset in BUILTIN_PRESETS {
            let parsed = parse_profile_str(preset.profile);
            assert!(parsed.is_ok(), "preset '{}' failed to parse", preset.name);
        }
    }

    #[test]
    fn preset_names_are_unique() {
        let mut names: Vec<_> = BUILTIN_PRESETS.iter().map(|p| p.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), BUILTIN_PRESETS.len());
    }

    #[test]
    fn find_known_and_unknown() {
        assert!(find_preset("dev").is_some());
        assert!(find_preset("prod").is_some());
        assert!(find_preset("qa").is_none());
    }

    #[test]
    fn prod_is_enterprise() {
        let profile = parse_profile_str(find_preset("prod").unwrap().profile).unwrap();
        assert_eq!(profile.service.edition, crate::Edition::Enterprise);
        assert!(profile.features.proxy);
    }
}
