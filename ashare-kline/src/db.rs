//! SQLite connection handling and the fixed (non-partitioned) schema.

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::{Result, StoreError};

// ============================================================================
// Database Schema
// ============================================================================

const CREATE_TABLES_SQL: &str = r#"
-- Instrument catalog
CREATE TABLE IF NOT EXISTS stock_info (
    code TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    sector TEXT,
    industry TEXT,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

-- ETF catalog
CREATE TABLE IF NOT EXISTS etf_info (
    etf_code TEXT PRIMARY KEY,
    etf_type TEXT NOT NULL,
    etf_name TEXT NOT NULL,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

-- Partition catalog, one row per monthly K-line table
CREATE TABLE IF NOT EXISTS table_info (
    table_name TEXT PRIMARY KEY,
    period TEXT NOT NULL,
    year_month TEXT NOT NULL,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_table_info_period_month
ON table_info(period, year_month);
"#;

/// Serialises every DDL statement issued by this process.
static DDL_LOCK: Mutex<()> = Mutex::new(());

/// Take the process-wide DDL lock.
///
/// The guarded value is `()`, so a poisoned lock carries no broken state and
/// is simply recovered.
pub(crate) fn ddl_guard() -> MutexGuard<'static, ()> {
    DDL_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Connections
// ============================================================================

/// Opens short-lived connections to one database file.
#[derive(Debug, Clone)]
pub(crate) struct Database {
    path: PathBuf,
    busy_timeout: Duration,
}

impl Database {
    /// Prepare the file: parent directory, WAL journal, fixed tables.
    pub(crate) fn initialize(path: PathBuf, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Self { path, busy_timeout };
        let conn = db.connect()?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;

        let _ddl = ddl_guard();
        conn.execute_batch(CREATE_TABLES_SQL)?;

        Ok(db)
    }

    pub(crate) fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(conn)
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

// ============================================================================
// Deadlines
// ============================================================================

/// Cooperative time budget for a store operation.
///
/// Checked between partitions; a single partition's statement is never
/// interrupted.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    /// A deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.started.elapsed() > self.budget
    }

    pub fn check(&self) -> Result<()> {
        if self.is_expired() {
            return Err(StoreError::DeadlineExceeded {
                elapsed_ms: self.started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64,
            });
        }
        Ok(())
    }
}

pub(crate) fn check_deadline(deadline: Option<&Deadline>) -> Result<()> {
    match deadline {
        Some(d) => d.check(),
        None => Ok(()),
    }
}
