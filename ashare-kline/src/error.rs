//! Error types for the K-line store.

use thiserror::Error;

/// Result type alias using the store error type.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by the store, the catalog and the aggregation engine.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Period string outside the supported set
    #[error("Invalid period: {0}")]
    InvalidPeriod(String),

    /// Malformed date, datetime or year-month text
    #[error("Invalid date: {0}")]
    InvalidDate(String),

    /// A table name that does not match the partition naming scheme
    #[error("Rejected identifier: {0}")]
    InvalidIdentifier(String),

    /// SQLite error
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The caller's deadline passed before the operation finished
    #[error("Operation exceeded its deadline after {elapsed_ms}ms")]
    DeadlineExceeded { elapsed_ms: u64 },

    /// Fewer bars than the caller requires
    #[error("Insufficient data for {code}: need {required} bars, have {available}")]
    InsufficientData {
        code: String,
        required: usize,
        available: usize,
    },
}

impl StoreError {
    /// Check if this is a caller usage error (bad period, date or name).
    pub const fn is_usage(&self) -> bool {
        matches!(
            self,
            Self::InvalidPeriod(_) | Self::InvalidDate(_) | Self::InvalidIdentifier(_)
        )
    }
}
