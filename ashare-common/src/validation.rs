//! Configuration validation.
//!
//! Fails fast on values the store would otherwise silently misuse.

use thiserror::Error;

use crate::config::{AggregationConfig, Config, ObservabilityConfig, RetentionConfig, StorageConfig};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors: Vec<ValidationError> = [
            self.storage.validate(),
            self.retention.validate(),
            self.aggregation.validate(),
            self.observability.validate(),
        ]
        .into_iter()
        .filter_map(Result::err)
        .collect();

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ValidationError::Multiple(errors)),
        }
    }
}

impl Validate for StorageConfig {
    fn validate(&self) -> ValidationResult<()> {
        if let Some(path) = &self.db_path {
            if path.trim().is_empty() {
                return Err(ValidationError::MissingField {
                    field: "storage.db_path".into(),
                });
            }
        }

        if self.busy_timeout_ms == 0 {
            return Err(ValidationError::InvalidValue {
                field: "storage.busy_timeout_ms".into(),
                reason: "must be greater than zero".into(),
            });
        }

        if self.etf_cache_enabled && self.etf_cache_ttl_secs <= 0 {
            return Err(ValidationError::InvalidValue {
                field: "storage.etf_cache_ttl_secs".into(),
                reason: "must be positive when the ETF cache is enabled".into(),
            });
        }

        if self.operation_timeout_ms == Some(0) {
            return Err(ValidationError::InvalidValue {
                field: "storage.operation_timeout_ms".into(),
                reason: "must be greater than zero".into(),
            });
        }

        Ok(())
    }
}

impl Validate for RetentionConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.enabled && self.keep_months == 0 {
            return Err(ValidationError::InvalidValue {
                field: "retention.keep_months".into(),
                reason: "must be at least 1 when retention is enabled".into(),
            });
        }

        if self.enabled && self.interval_hours == 0 {
            return Err(ValidationError::InvalidValue {
                field: "retention.interval_hours".into(),
                reason: "must be greater than zero".into(),
            });
        }

        Ok(())
    }
}

/// Minutes covered by a bar of `period`, for the period spellings the store
/// accepts. A trading day counts as 240 minutes.
fn period_minutes(period: &str) -> Option<u32> {
    match period.trim().to_lowercase().as_str() {
        "1m" | "1" | "m1" => Some(1),
        "5m" | "5" | "m5" => Some(5),
        "30m" | "30" | "m30" => Some(30),
        "1d" | "d" | "daily" => Some(240),
        _ => None,
    }
}

fn check_period(field: &str, value: &str) -> ValidationResult<u32> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField { field: field.into() });
    }
    period_minutes(value).ok_or_else(|| ValidationError::InvalidValue {
        field: field.into(),
        reason: format!("unknown period '{value}', expected one of: 1m, 5m, 30m, 1d"),
    })
}

impl Validate for AggregationConfig {
    fn validate(&self) -> ValidationResult<()> {
        let native = check_period("aggregation.native_period", &self.native_period)?;
        let tick = check_period("aggregation.tick_period", &self.tick_period)?;

        if tick > native {
            return Err(ValidationError::InvalidValue {
                field: "aggregation.tick_period".into(),
                reason: format!(
                    "'{}' is coarser than native period '{}'",
                    self.tick_period, self.native_period
                ),
            });
        }

        if self.min_bars == 0 {
            return Err(ValidationError::InvalidValue {
                field: "aggregation.min_bars".into(),
                reason: "must be at least 1".into(),
            });
        }

        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            });
        }

        Ok(())
    }
}
