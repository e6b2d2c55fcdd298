//! Engine configuration.
//!
//! Keys are loaded from a TOML file and may be overridden by environment
//! variables prefixed with `WAFERPLAN_`. No secret material is stored in
//! strategies or schematics, so the configuration carries none either.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{with_err_context, ErrorContext, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Directory used by the file-backed repository.
    pub storage_path: PathBuf,
    /// Maximum accepted upload size in bytes.
    pub max_upload_bytes: u64,
    /// Maximum dies per parsed schematic.
    pub max_dies: usize,
    /// Maximum sites per simulation after `max_sites` clamping.
    pub max_sites: usize,
    /// Bounded size of the compiled-strategy cache.
    pub compile_cache_entries: usize,
    /// Origins allowed by the (external) HTTP layer.
    pub cors_origins: Vec<String>,
    /// Whether plugin registration scans for externally registered factories
    /// at bootstrap.
    pub auto_discover_plugins: bool,
    pub timeouts: Timeouts,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Timeouts {
    pub upload_ms: u64,
    pub parse_ms: u64,
    pub simulate_ms: u64,
    pub validate_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            upload_ms: 30_000,
            parse_ms: 60_000,
            simulate_ms: 10_000,
            validate_ms: 10_000,
        }
    }
}

impl Timeouts {
    pub fn parse(&self) -> Duration {
        Duration::from_millis(self.parse_ms)
    }

    pub fn simulate(&self) -> Duration {
        Duration::from_millis(self.simulate_ms)
    }

    pub fn validate(&self) -> Duration {
        Duration::from_millis(self.validate_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("./data"),
            max_upload_bytes: 100 * 1024 * 1024,
            max_dies: 100_000,
            max_sites: 10_000,
            compile_cache_entries: 256,
            cors_origins: Vec::new(),
            auto_discover_plugins: false,
            timeouts: Timeouts::default(),
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file, then applies environment
    /// overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = with_err_context(std::fs::read_to_string(path), || {
            ErrorContext::ReadFile(path.to_path_buf())
        })?;
        let mut config: Config = toml::from_str(&raw)?;
        config.apply_env();
        Ok(config)
    }

    /// Applies `WAFERPLAN_*` environment overrides to scalar keys.
    pub fn apply_env(&mut self) {
        if let Some(v) = env_parse::<String>("WAFERPLAN_STORAGE_PATH") {
            self.storage_path = PathBuf::from(v);
        }
        if let Some(v) = env_parse("WAFERPLAN_MAX_UPLOAD_BYTES") {
            self.max_upload_bytes = v;
        }
        if let Some(v) = env_parse("WAFERPLAN_MAX_DIES") {
            self.max_dies = v;
        }
        if let Some(v) = env_parse("WAFERPLAN_MAX_SITES") {
            self.max_sites = v;
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_resource_limits() {
        let config = Config::default();
        assert_eq!(config.max_upload_bytes, 100 * 1024 * 1024);
        assert_eq!(config.max_dies, 100_000);
        assert_eq!(config.max_sites, 10_000);
        assert_eq!(config.timeouts.parse_ms, 60_000);
    }

    #[test]
    fn toml_round_trip() {
        let config = Config::default();
        let raw = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&raw).unwrap();
        assert_eq!(parsed, config);
    }
}
