//! Layered configuration for the gateway: built-in defaults, overridden by
//! `config.toml`, overridden by environment variables — grounded in the
//! teacher's `ConfigStore` (`tandem-core/src/config.rs`) global/project/env
//! layering, generalized from a nested `AppConfig` struct to the flat key
//! table this system's components read from (`spec.md` §6).

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: String, source: toml::de::Error },
    #[error("env var `{0}` is not valid for its key's type")]
    InvalidEnvValue(String),
}

/// The flat key table every component reads through (`spec.md` §6):
/// Query Planner / Cost Guard limits, ETL batch controls, the vector
/// index's TTL, tool fan-out, stream timing, and the redaction toggle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    pub max_bytes_scanned: u64,
    pub require_partition_filter: bool,
    pub default_limit: u32,
    pub max_limit: u32,
    pub default_time_window_hours: u32,
    pub max_time_window_hours: u32,
    pub token_budget_max: u64,
    pub etl_batch_size: u32,
    pub etl_error_threshold_pct: u8,
    pub embedding_ttl_days: u32,
    pub tool_fanout_max: u32,
    pub stream_heartbeat_seconds: u64,
    pub stream_slow_consumer_seconds: u64,
    pub pii_redaction_enabled: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_bytes_scanned: 50 * 1024 * 1024 * 1024,
            require_partition_filter: true,
            default_limit: 100,
            max_limit: 1000,
            default_time_window_hours: 24,
            max_time_window_hours: 720,
            token_budget_max: 10_000,
            etl_batch_size: 1000,
            etl_error_threshold_pct: 5,
            embedding_ttl_days: 7,
            tool_fanout_max: 4,
            stream_heartbeat_seconds: 15,
            stream_slow_consumer_seconds: 30,
            pii_redaction_enabled: true,
        }
    }
}

/// Environment variable names, one per [`GatewayConfig`] field, uppercased
/// exactly as named in `spec.md` §6's key table.
const ENV_KEYS: &[&str] = &[
    "MAX_BYTES_SCANNED",
    "REQUIRE_PARTITION_FILTER",
    "DEFAULT_LIMIT",
    "MAX_LIMIT",
    "DEFAULT_TIME_WINDOW_HOURS",
    "MAX_TIME_WINDOW_HOURS",
    "TOKEN_BUDGET_MAX",
    "ETL_BATCH_SIZE",
    "ETL_ERROR_THRESHOLD_PCT",
    "EMBEDDING_TTL_DAYS",
    "TOOL_FANOUT_MAX",
    "STREAM_HEARTBEAT_SECONDS",
    "STREAM_SLOW_CONSUMER_SECONDS",
    "PII_REDACTION_ENABLED",
];

pub struct ConfigStore {
    effective: GatewayConfig,
}

impl ConfigStore {
    /// Loads defaults, merges a `config.toml` at `path` if present, then
    /// merges `env` (process environment by default; injectable for tests).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = GatewayConfig::default();

        if let Some(path) = path {
            if path.exists() {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })?;
                let file_config: PartialGatewayConfig =
                    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
                        path: path.display().to_string(),
                        source,
                    })?;
                file_config.apply_onto(&mut config);
            }
        }

        let env_overrides: HashMap<String, String> = ENV_KEYS
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|v| (key.to_string(), v)))
            .collect();
        apply_env(&mut config, &env_overrides)?;

        Ok(Self { effective: config })
    }

    /// Test/embedding-friendly constructor that never touches the real
    /// process environment or filesystem.
    pub fn from_layers(
        file_config: Option<PartialGatewayConfig>,
        env: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let mut config = GatewayConfig::default();
        if let Some(file_config) = file_config {
            file_config.apply_onto(&mut config);
        }
        apply_env(&mut config, env)?;
        Ok(Self { effective: config })
    }

    pub fn get(&self) -> &GatewayConfig {
        &self.effective
    }
}

/// Mirrors [`GatewayConfig`] with every field optional, for partial
/// `config.toml` files (only the keys an operator wants to override).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialGatewayConfig {
    pub max_bytes_scanned: Option<u64>,
    pub require_partition_filter: Option<bool>,
    pub default_limit: Option<u32>,
    pub max_limit: Option<u32>,
    pub default_time_window_hours: Option<u32>,
    pub max_time_window_hours: Option<u32>,
    pub token_budget_max: Option<u64>,
    pub etl_batch_size: Option<u32>,
    pub etl_error_threshold_pct: Option<u8>,
    pub embedding_ttl_days: Option<u32>,
    pub tool_fanout_max: Option<u32>,
    pub stream_heartbeat_seconds: Option<u64>,
    pub stream_slow_consumer_seconds: Option<u64>,
    pub pii_redaction_enabled: Option<bool>,
}

impl PartialGatewayConfig {
    fn apply_onto(self, config: &mut GatewayConfig) {
        macro_rules! apply {
            ($field:ident) => {
                if let Some(value) = self.$field {
                    config.$field = value;
                }
            };
        }
        apply!(max_bytes_scanned);
        apply!(require_partition_filter);
        apply!(default_limit);
        apply!(max_limit);
        apply!(default_time_window_hours);
        apply!(max_time_window_hours);
        apply!(token_budget_max);
        apply!(etl_batch_size);
        apply!(etl_error_threshold_pct);
        apply!(embedding_ttl_days);
        apply!(tool_fanout_max);
        apply!(stream_heartbeat_seconds);
        apply!(stream_slow_consumer_seconds);
        apply!(pii_redaction_enabled);
    }
}

fn apply_env(config: &mut GatewayConfig, env: &HashMap<String, String>) -> Result<(), ConfigError> {
    macro_rules! parse_env {
        ($key:expr, $field:ident) => {
            if let Some(raw) = env.get($key) {
                config.$field = raw
                    .parse()
                    .map_err(|_| ConfigError::InvalidEnvValue($key.to_string()))?;
            }
        };
    }
    parse_env!("MAX_BYTES_SCANNED", max_bytes_scanned);
    parse_env!("REQUIRE_PARTITION_FILTER", require_partition_filter);
    parse_env!("DEFAULT_LIMIT", default_limit);
    parse_env!("MAX_LIMIT", max_limit);
    parse_env!("DEFAULT_TIME_WINDOW_HOURS", default_time_window_hours);
    parse_env!("MAX_TIME_WINDOW_HOURS", max_time_window_hours);
    parse_env!("TOKEN_BUDGET_MAX", token_budget_max);
    parse_env!("ETL_BATCH_SIZE", etl_batch_size);
    parse_env!("ETL_ERROR_THRESHOLD_PCT", etl_error_threshold_pct);
    parse_env!("EMBEDDING_TTL_DAYS", embedding_ttl_days);
    parse_env!("TOOL_FANOUT_MAX", tool_fanout_max);
    parse_env!("STREAM_HEARTBEAT_SECONDS", stream_heartbeat_seconds);
    parse_env!("STREAM_SLOW_CONSUMER_SECONDS", stream_slow_consumer_seconds);
    parse_env!("PII_REDACTION_ENABLED", pii_redaction_enabled);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_documented_values() {
        let config = GatewayConfig::default();
        assert_eq!(config.default_limit, 100);
        assert_eq!(config.tool_fanout_max, 4);
        assert_eq!(config.stream_heartbeat_seconds, 15);
        assert_eq!(config.stream_slow_consumer_seconds, 30);
    }

    #[test]
    fn file_layer_overrides_defaults() {
        let file_config = PartialGatewayConfig {
            max_limit: Some(50),
            ..Default::default()
        };
        let store = ConfigStore::from_layers(Some(file_config), &HashMap::new()).unwrap();
        assert_eq!(store.get().max_limit, 50);
        assert_eq!(store.get().default_limit, 100);
    }

    #[test]
    fn env_layer_overrides_file_layer() {
        let file_config = PartialGatewayConfig {
            max_limit: Some(50),
            ..Default::default()
        };
        let mut env = HashMap::new();
        env.insert("MAX_LIMIT".to_string(), "200".to_string());
        let store = ConfigStore::from_layers(Some(file_config), &env).unwrap();
        assert_eq!(store.get().max_limit, 200);
    }

    #[test]
    fn invalid_env_value_is_a_config_error() {
        let mut env = HashMap::new();
        env.insert("MAX_LIMIT".to_string(), "not-a-number".to_string());
        let result = ConfigStore::from_layers(None, &env);
        assert!(matches!(result, Err(ConfigError::InvalidEnvValue(_))));
    }

    #[test]
    fn load_reads_a_real_toml_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "tool_fanout_max = 8\n").unwrap();
        let store = ConfigStore::load(Some(&path)).unwrap();
        assert_eq!(store.get().tool_fanout_max, 8);
    }
}
