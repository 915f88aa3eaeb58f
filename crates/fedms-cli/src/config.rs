//! CLI configuration
//!
//! Read from `FEDMS_*` environment variables with defaults; command-line
//! flags override individual values afterwards.

use std::env;
use std::path::PathBuf;
use tracing::Level;

pub const DEFAULT_KEY_DIR: &str = "fo_jwks";
pub const DEFAULT_STORE_DIR: &str = "ms";
pub const DEFAULT_URI_BASE: &str = "https://localhost/ms";
pub const DEFAULT_AUTHORITY: &str = "https://localhost";

#[derive(Debug, Clone, PartialEq)]
pub struct CliConfig {
    pub log_level: Level,
    /// Persisted key bundles, one file per issuer
    pub key_dir: PathBuf,
    /// Filesystem statement store
    pub store_dir: PathBuf,
    /// Prefix of published statement URIs
    pub uri_base: String,
    /// Issuer that attests every generated bundle
    pub authority: String,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            key_dir: PathBuf::from(DEFAULT_KEY_DIR),
            store_dir: PathBuf::from(DEFAULT_STORE_DIR),
            uri_base: DEFAULT_URI_BASE.into(),
            authority: DEFAULT_AUTHORITY.into(),
        }
    }
}

impl CliConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            log_level: lookup("FEDMS_LOG_LEVEL")
                .and_then(|level| level.parse().ok())
                .unwrap_or(defaults.log_level),
            key_dir: lookup("FEDMS_KEY_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.key_dir),
            store_dir: lookup("FEDMS_STORE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.store_dir),
            uri_base: lookup("FEDMS_URI_BASE")
                .map(|base| base.trim_end_matches('/').to_string())
                .unwrap_or(defaults.uri_base),
            authority: lookup("FEDMS_AUTHORITY").unwrap_or(defaults.authority),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = CliConfig::from_lookup(lookup(&[]));
        assert_eq!(config, CliConfig::default());
        assert_eq!(config.uri_base, "https://localhost/ms");
    }

    #[test]
    fn test_env_overrides() {
        let config = CliConfig::from_lookup(lookup(&[
            ("FEDMS_LOG_LEVEL", "debug"),
            ("FEDMS_KEY_DIR", "/var/lib/fedms/keys"),
            ("FEDMS_URI_BASE", "https://mds.example.org/ms/"),
            ("FEDMS_AUTHORITY", "https://test.example.com"),
        ]));
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.key_dir, PathBuf::from("/var/lib/fedms/keys"));
        assert_eq!(config.store_dir, PathBuf::from(DEFAULT_STORE_DIR));
        assert_eq!(config.uri_base, "https://mds.example.org/ms");
        assert_eq!(config.authority, "https://test.example.com");
    }

    #[test]
    fn test_bad_log_level_falls_back() {
        let config = CliConfig::from_lookup(lookup(&[("FEDMS_LOG_LEVEL", "loud")]));
        assert_eq!(config.log_level, Level::INFO);
    }
}
