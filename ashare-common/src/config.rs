//! Configuration management for the K-line store.
//!
//! The store and its tools share one configuration file at `~/.ashare/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (ASHARE_* prefix)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `ASHARE_DB_PATH` → storage.db_path
//! - `ASHARE_LOG_LEVEL` → observability.log_level
//! - `ASHARE_KEEP_MONTHS` → retention.keep_months

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".ashare"),
        |dirs| dirs.home_dir().join(".ashare"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// JSON Schema reference
    #[serde(rename = "$schema", default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Database location and connection behaviour
    #[serde(default)]
    pub storage: StorageConfig,

    /// Partition retention
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Intraday roll-up settings
    #[serde(default)]
    pub aggregation: AggregationConfig,

    /// Logging configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("ASHARE_DB_PATH") {
            self.storage.db_path = Some(path);
        }

        if let Some(level) = lookup("ASHARE_LOG_LEVEL") {
            self.observability.log_level = level;
        }

        if let Some(months) = lookup("ASHARE_KEEP_MONTHS") {
            match months.parse() {
                Ok(m) => self.retention.keep_months = m,
                Err(_) => tracing::warn!(value = %months, "Ignoring invalid ASHARE_KEEP_MONTHS"),
            }
        }
    }
}

// ============================================================================
// Storage
// ============================================================================

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database path (defaults to `~/.ashare/industry_data.db`)
    #[serde(default)]
    pub db_path: Option<String>,

    /// How long a connection waits on a locked database before failing
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Cache ETF lookups in memory
    #[serde(default = "default_true")]
    pub etf_cache_enabled: bool,

    /// TTL for cached ETF lookups
    #[serde(default = "default_etf_cache_ttl_secs")]
    pub etf_cache_ttl_secs: i64,

    /// Upper bound on a single query or insert call.
    /// Checked before each partition is touched.
    #[serde(default)]
    pub operation_timeout_ms: Option<u64>,
}

impl StorageConfig {
    /// Resolve the database path, falling back to the config directory.
    pub fn resolved_db_path(&self) -> PathBuf {
        self.db_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| config_dir().join("industry_data.db"))
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            busy_timeout_ms: default_busy_timeout_ms(),
            etf_cache_enabled: true,
            etf_cache_ttl_secs: default_etf_cache_ttl_secs(),
            operation_timeout_ms: None,
        }
    }
}

// ============================================================================
// Retention
// ============================================================================

/// Retention configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Whether the periodic cleanup loop runs
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Number of calendar months of partitions to keep
    #[serde(default = "default_keep_months")]
    pub keep_months: u32,

    /// Hours between cleanup runs
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            keep_months: default_keep_months(),
            interval_hours: default_interval_hours(),
        }
    }
}

// ============================================================================
// Aggregation
// ============================================================================

/// Intraday aggregation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Period historical bars are stored in ("5m" by default)
    #[serde(default = "default_native_period")]
    pub native_period: String,

    /// Period live ticks are stored in ("1m" by default)
    #[serde(default = "default_tick_period")]
    pub tick_period: String,

    /// Minimum stitched series length indicator callers need
    #[serde(default = "default_min_bars")]
    pub min_bars: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            native_period: default_native_period(),
            tick_period: default_tick_period(),
            min_bars: default_min_bars(),
        }
    }
}

// ============================================================================
// Observability
// ============================================================================

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_busy_timeout_ms() -> u64 {
    5_000
}
fn default_etf_cache_ttl_secs() -> i64 {
    300
}
fn default_keep_months() -> u32 {
    6
}
fn default_interval_hours() -> u64 {
    24
}
fn default_native_period() -> String {
    "5m".into()
}
fn default_tick_period() -> String {
    "1m".into()
}
fn default_min_bars() -> usize {
    60
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "pretty".into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_from_empty_json() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.retention.keep_months, 6);
        assert_eq!(config.storage.busy_timeout_ms, 5_000);
        assert_eq!(config.aggregation.native_period, "5m");
        assert_eq!(config.aggregation.tick_period, "1m");
        assert_eq!(config.observability.log_format, "pretty");
        assert!(config.storage.operation_timeout_ms.is_none());
    }

    #[test]
    fn test_partial_sections() {
        let config: Config = serde_json::from_str(
            r#"{
                "storage": { "db_path": "/tmp/k.db", "operation_timeout_ms": 250 },
                "observability": { "level": "debug" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.storage.resolved_db_path(), PathBuf::from("/tmp/k.db"));
        assert_eq!(config.storage.operation_timeout_ms, Some(250));
        assert!(config.storage.etf_cache_enabled);
        assert_eq!(config.observability.log_level, "debug");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "retention": { "keep_months": 12 } }"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.retention.keep_months, 12);
        assert_eq!(config.retention.interval_hours, 24);
    }

    #[test]
    fn test_load_from_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("ASHARE_DB_PATH", "/data/kline.db"),
            ("ASHARE_LOG_LEVEL", "warn"),
            ("ASHARE_KEEP_MONTHS", "3"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides_from(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.storage.db_path.as_deref(), Some("/data/kline.db"));
        assert_eq!(config.observability.log_level, "warn");
        assert_eq!(config.retention.keep_months, 3);
    }

    #[test]
    fn test_invalid_keep_months_override_ignored() {
        let mut config = Config::default();
        config.apply_overrides_from(|k| (k == "ASHARE_KEEP_MONTHS").then(|| "six".to_string()));
        assert_eq!(config.retention.keep_months, 6);
    }
}
