//! Partition catalog.
//!
//! Bars live in one table per (period, calendar month), named
//! `kline_<period>_<yyyy>_<mm>`. The set of existing partitions is recorded in
//! `table_info` so range planning never has to scan `sqlite_master`.
//!
//! Table names are the only identifiers interpolated into SQL. They are built
//! from the closed [`Period`] enum and a validated [`YearMonth`], then checked
//! once more against the naming pattern before use.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::{ddl_guard, Database};
use crate::error::{Result, StoreError};
use crate::types::{Period, YearMonth};

static PARTITION_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^kline_(1m|5m|30m|1d)_\d{4}_\d{2}$").expect("static partition name pattern")
});

/// Build the table name for a partition.
pub fn partition_table_name(period: Period, year_month: YearMonth) -> Result<String> {
    let name = format!("kline_{}_{}", period.as_str(), year_month.table_suffix());
    checked_identifier(&name)?;
    Ok(name)
}

/// Reject anything that is not a well-formed partition name.
pub(crate) fn checked_identifier(name: &str) -> Result<&str> {
    if PARTITION_NAME_RE.is_match(name) {
        Ok(name)
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

fn partition_ddl(table: &str) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT NOT NULL,
            name TEXT NOT NULL,
            datetime TEXT NOT NULL,
            open_price REAL NOT NULL,
            high_price REAL NOT NULL,
            low_price REAL NOT NULL,
            close_price REAL NOT NULL,
            volume INTEGER DEFAULT 0,
            amount REAL DEFAULT 0,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(code, datetime)
        );
        CREATE INDEX IF NOT EXISTS idx_{table}_code ON {table}(code);
        CREATE INDEX IF NOT EXISTS idx_{table}_datetime ON {table}(datetime);
        CREATE INDEX IF NOT EXISTS idx_{table}_code_datetime ON {table}(code, datetime);
        "#
    )
}

/// A known monthly partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionDescriptor {
    pub table_name: String,
    pub period: Period,
    #[serde(serialize_with = "serialize_display")]
    pub year_month: YearMonth,
}

fn serialize_display<S: serde::Serializer>(ym: &YearMonth, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.collect_str(ym)
}

impl PartitionDescriptor {
    pub fn new(period: Period, year_month: YearMonth) -> Result<Self> {
        Ok(Self {
            table_name: partition_table_name(period, year_month)?,
            period,
            year_month,
        })
    }

    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<(String, String, String)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
    }

    /// Rebuild a descriptor from a `table_info` row, re-deriving the name.
    fn from_catalog(table_name: &str, period: &str, year_month: &str) -> Result<Self> {
        let descriptor = Self::new(period.parse()?, year_month.parse()?)?;
        if descriptor.table_name != table_name {
            return Err(StoreError::InvalidIdentifier(table_name.to_string()));
        }
        Ok(descriptor)
    }
}

/// Resolves and creates partitions.
#[derive(Debug, Clone)]
pub struct SchemaCatalog {
    db: Database,
}

impl SchemaCatalog {
    pub(crate) fn new(db: Database) -> Self {
        Self { db }
    }

    /// Make sure the partition holding `date` for `period` exists.
    ///
    /// Table creation and the catalog row are both idempotent, and run under
    /// the process-wide DDL lock, so concurrent first writers are harmless.
    pub fn ensure_partition(&self, period: Period, date: NaiveDate) -> Result<PartitionDescriptor> {
        let descriptor = PartitionDescriptor::new(period, YearMonth::of(date))?;

        let _ddl = ddl_guard();
        let conn = self.db.connect()?;
        conn.execute_batch(&partition_ddl(&descriptor.table_name))?;
        let recorded = conn.execute(
            "INSERT OR IGNORE INTO table_info (table_name, period, year_month) VALUES (?1, ?2, ?3)",
            params![
                descriptor.table_name,
                period.as_str(),
                descriptor.year_month.to_string()
            ],
        )?;

        if recorded > 0 {
            info!(table = %descriptor.table_name, "Created partition");
        }
        Ok(descriptor)
    }

    /// Partitions a date range touches, ordered by month.
    ///
    /// With no bounds every partition of `period` is returned. With both
    /// bounds the calendar months between them are enumerated and only those
    /// present in the catalog are kept. A single bound compares `YYYY-MM`
    /// text, which sorts the same way as the months themselves.
    pub fn partitions_for_range(
        &self,
        period: Period,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Vec<PartitionDescriptor>> {
        let conn = self.db.connect()?;
        let known = Self::load(&conn, Some(period))?;

        let in_range: Vec<PartitionDescriptor> = match (start_date, end_date) {
            (None, None) => known,
            (Some(start), Some(end)) => {
                let months =
                    YearMonth::range_inclusive(YearMonth::of(start), YearMonth::of(end));
                known
                    .into_iter()
                    .filter(|d| months.contains(&d.year_month))
                    .collect()
            }
            (Some(start), None) => {
                let floor = YearMonth::of(start).to_string();
                known
                    .into_iter()
                    .filter(|d| d.year_month.to_string() >= floor)
                    .collect()
            }
            (None, Some(end)) => {
                let ceiling = YearMonth::of(end).to_string();
                known
                    .into_iter()
                    .filter(|d| d.year_month.to_string() <= ceiling)
                    .collect()
            }
        };

        debug!(period = %period, partitions = in_range.len(), "Planned partition range");
        Ok(in_range)
    }

    /// Every known partition, all periods, ordered by period then month.
    pub fn all_partitions(&self) -> Result<Vec<PartitionDescriptor>> {
        let conn = self.db.connect()?;
        Self::load(&conn, None)
    }

    /// Partitions strictly older than `cutoff`, all periods.
    pub fn partitions_before(&self, cutoff: YearMonth) -> Result<Vec<PartitionDescriptor>> {
        Ok(self
            .all_partitions()?
            .into_iter()
            .filter(|d| d.year_month < cutoff)
            .collect())
    }

    /// When a partition was first recorded.
    pub fn created_at(&self, table_name: &str) -> Result<Option<String>> {
        let conn = self.db.connect()?;
        let created = conn
            .query_row(
                "SELECT created_at FROM table_info WHERE table_name = ?1",
                params![table_name],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(created.flatten())
    }

    /// Drop a partition table and its catalog row.
    pub fn drop_partition(&self, descriptor: &PartitionDescriptor) -> Result<()> {
        let table = checked_identifier(&descriptor.table_name)?;

        let _ddl = ddl_guard();
        let mut conn = self.db.connect()?;
        let tx = conn.transaction()?;
        tx.execute_batch(&format!("DROP TABLE IF EXISTS {table}"))?;
        tx.execute(
            "DELETE FROM table_info WHERE table_name = ?1",
            params![table],
        )?;
        tx.commit()?;

        info!(table, "Dropped partition");
        Ok(())
    }

    fn load(conn: &Connection, period: Option<Period>) -> Result<Vec<PartitionDescriptor>> {
        let rows: Vec<(String, String, String)> = match period {
            Some(p) => {
                let mut stmt = conn.prepare(
                    "SELECT table_name, period, year_month FROM table_info
                     WHERE period = ?1 ORDER BY year_month",
                )?;
                let rows = stmt.query_map(params![p.as_str()], PartitionDescriptor::from_row)?;
                rows.collect::<rusqlite::Result<_>>()?
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT table_name, period, year_month FROM table_info
                     ORDER BY period, year_month",
                )?;
                let rows = stmt.query_map([], PartitionDescriptor::from_row)?;
                rows.collect::<rusqlite::Result<_>>()?
            }
        };

        let mut descriptors = Vec::with_capacity(rows.len());
        for (table_name, period, year_month) in rows {
            match PartitionDescriptor::from_catalog(&table_name, &period, &year_month) {
                Ok(d) => descriptors.push(d),
                Err(e) => warn!(table = %table_name, error = %e, "Ignoring malformed catalog row"),
            }
        }
        Ok(descriptors)
    }
}
