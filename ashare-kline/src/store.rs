//! Month-partitioned bar storage.
//!
//! Writes are grouped by calendar month, each group upserted into its own
//! partition inside one transaction. Reads plan the partitions a date range
//! touches, query each one and merge the results.

use ashare_common::StorageConfig;
use chrono::{NaiveDate, NaiveTime};
use rusqlite::{params, params_from_iter, Connection, TransactionBehavior};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::EtfCache;
use crate::catalog::{checked_identifier, PartitionDescriptor, SchemaCatalog};
use crate::db::{check_deadline, Database, Deadline};
use crate::error::Result;
use crate::instruments::{record_unseen, EtfInfo, InstrumentCatalog, InstrumentInfo};
use crate::types::{format_datetime, parse_datetime, sort_dedup_keep_last, BarRecord, Period, YearMonth};

// ============================================================================
// Configuration
// ============================================================================

/// Settings for opening a store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// SQLite database file
    pub db_path: PathBuf,
    /// How long a connection waits on a locked database
    pub busy_timeout: Duration,
    /// TTL of the ETF lookup cache; `None` disables it
    pub etf_cache_ttl_secs: Option<i64>,
    /// Default budget for `insert` and `query`
    pub operation_timeout: Option<Duration>,
}

impl StoreConfig {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            busy_timeout: Duration::from_millis(5000),
            etf_cache_ttl_secs: Some(EtfCache::DEFAULT_TTL_SECS),
            operation_timeout: None,
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            db_path: config.resolved_db_path(),
            busy_timeout: Duration::from_millis(config.busy_timeout_ms),
            etf_cache_ttl_secs: config
                .etf_cache_enabled
                .then_some(config.etf_cache_ttl_secs),
            operation_timeout: config.operation_timeout_ms.map(Duration::from_millis),
        }
    }
}

// ============================================================================
// Query Filter
// ============================================================================

/// Selection for [`PartitionedBarStore::query`]. Every field is optional.
#[derive(Debug, Clone, Default)]
pub struct BarFilter {
    pub code: Option<String>,
    /// Inclusive, from 00:00:00
    pub start_date: Option<NaiveDate>,
    /// Inclusive, through 23:59:59
    pub end_date: Option<NaiveDate>,
    /// Head of a single partition, tail of a multi-partition result
    pub limit: Option<usize>,
    pub deadline: Option<Deadline>,
}

impl BarFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn start(mut self, date: NaiveDate) -> Self {
        self.start_date = Some(date);
        self
    }

    pub fn end(mut self, date: NaiveDate) -> Self {
        self.end_date = Some(date);
        self
    }

    pub fn between(self, start: NaiveDate, end: NaiveDate) -> Self {
        self.start(start).end(end)
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Row count and time span of one partition.
#[derive(Debug, Clone, Serialize)]
pub struct TableStatistics {
    pub table_name: String,
    pub period: Period,
    pub year_month: String,
    pub record_count: u64,
    pub min_datetime: Option<String>,
    pub max_datetime: Option<String>,
    pub created_at: Option<String>,
}

// ============================================================================
// Store
// ============================================================================

/// Partitioned K-line store backed by one SQLite file.
///
/// Cheap to clone; clones share the ETF cache. Every operation opens its own
/// connection, so clones can be used from different threads.
#[derive(Debug, Clone)]
pub struct PartitionedBarStore {
    db: Database,
    catalog: SchemaCatalog,
    instruments: InstrumentCatalog,
    operation_timeout: Option<Duration>,
}

impl PartitionedBarStore {
    /// Open (creating if needed) the database described by `config`.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let db = Database::initialize(config.db_path, config.busy_timeout)?;
        let etf_cache = config
            .etf_cache_ttl_secs
            .map(|ttl| Arc::new(EtfCache::with_ttl(ttl)));

        info!(db_path = %db.path().display(), "Opened K-line store");

        Ok(Self {
            catalog: SchemaCatalog::new(db.clone()),
            instruments: InstrumentCatalog::new(db.clone(), etf_cache),
            db,
            operation_timeout: config.operation_timeout,
        })
    }

    /// Open with default settings at `path`.
    pub fn open_path(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open(StoreConfig::new(path))
    }

    /// Replace the ETF cache, or remove it with `None`.
    pub fn with_etf_cache(mut self, cache: Option<Arc<EtfCache>>) -> Self {
        self.instruments.set_etf_cache(cache);
        self
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    pub fn instruments(&self) -> &InstrumentCatalog {
        &self.instruments
    }

    pub fn db_path(&self) -> &Path {
        self.db.path()
    }

    fn default_deadline(&self) -> Option<Deadline> {
        self.operation_timeout.map(Deadline::after)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Upsert bars, returning how many rows were written.
    pub fn insert(&self, period: Period, records: &[BarRecord]) -> Result<usize> {
        let deadline = self.default_deadline();
        self.insert_within(period, records, deadline.as_ref())
    }

    /// [`insert`](Self::insert) with an explicit deadline, checked before
    /// each partition. Partitions already committed stay committed.
    ///
    /// Rows are best-effort: a malformed row or a failing upsert is logged
    /// and skipped without affecting its neighbours.
    pub fn insert_within(
        &self,
        period: Period,
        records: &[BarRecord],
        deadline: Option<&Deadline>,
    ) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut by_month: BTreeMap<YearMonth, Vec<&BarRecord>> = BTreeMap::new();
        let mut skipped = 0usize;
        for record in records {
            if let Some(reason) = record.defect() {
                warn!(
                    code = %record.code,
                    datetime = %format_datetime(&record.datetime),
                    reason,
                    "Skipping malformed bar"
                );
                skipped += 1;
                continue;
            }
            by_month.entry(record.year_month()).or_default().push(record);
        }

        let mut written = 0usize;
        for rows in by_month.values() {
            check_deadline(deadline)?;

            let descriptor = self.catalog.ensure_partition(period, rows[0].date())?;
            let count = self.upsert_partition(&descriptor, rows)?;
            skipped += rows.len() - count;
            written += count;
        }

        debug!(period = %period, written, skipped, "Inserted bars");
        Ok(written)
    }

    fn upsert_partition(&self, descriptor: &PartitionDescriptor, rows: &[&BarRecord]) -> Result<usize> {
        let table = checked_identifier(&descriptor.table_name)?;
        let mut conn = self.db.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut count = 0usize;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT OR REPLACE INTO {table}
                 (code, name, datetime, open_price, high_price, low_price, close_price, volume, amount)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ))?;
            // date-only text is the same instant as midnight
            let mut drop_date_only =
                tx.prepare(&format!("DELETE FROM {table} WHERE code = ?1 AND datetime = ?2"))?;

            for bar in rows {
                if bar.datetime.time() == NaiveTime::MIN {
                    if let Err(e) = drop_date_only.execute(params![bar.code, bar.date().to_string()]) {
                        warn!(table, code = %bar.code, error = %e, "Failed to replace date-only bar");
                    }
                }

                let result = stmt.execute(params![
                    bar.code,
                    bar.name,
                    format_datetime(&bar.datetime),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume,
                    bar.amount,
                ]);

                match result {
                    Ok(_) => count += 1,
                    Err(e) => warn!(
                        table,
                        code = %bar.code,
                        datetime = %format_datetime(&bar.datetime),
                        error = %e,
                        "Failed to upsert bar"
                    ),
                }
            }

            let mut names: HashMap<&str, &str> = HashMap::new();
            for bar in rows {
                names.entry(bar.code.as_str()).or_insert(bar.name.as_str());
            }
            for (code, name) in names {
                if record_unseen(&tx, code, name)? {
                    debug!(code, "Recorded new instrument");
                }
            }
        }
        tx.commit()?;

        debug!(table, count, "Upserted partition rows");
        Ok(count)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Bars of `period` matching `filter`, ascending by datetime.
    ///
    /// A single-partition result is limited by SQL `LIMIT` and so keeps the
    /// earliest rows. A result spanning partitions is merged and then cut to
    /// its most recent `limit` rows. Either way no `(code, datetime)` repeats.
    pub fn query(&self, period: Period, filter: &BarFilter) -> Result<Vec<BarRecord>> {
        let deadline = filter.deadline.or_else(|| self.default_deadline());
        let partitions =
            self.catalog
                .partitions_for_range(period, filter.start_date, filter.end_date)?;
        if partitions.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.db.connect()?;
        if let [only] = partitions.as_slice() {
            check_deadline(deadline.as_ref())?;
            let bars = Self::query_partition(&conn, &only.table_name, filter, filter.limit)?;
            return Ok(sort_dedup_keep_last(bars, |b| (b.code.clone(), b.datetime)));
        }

        let mut bars = Vec::new();
        for partition in &partitions {
            check_deadline(deadline.as_ref())?;
            bars.extend(Self::query_partition(&conn, &partition.table_name, filter, None)?);
        }

        let mut merged = sort_dedup_keep_last(bars, |b| (b.code.clone(), b.datetime));
        if let Some(limit) = filter.limit {
            if merged.len() > limit {
                merged.drain(..merged.len() - limit);
            }
        }

        debug!(period = %period, partitions = partitions.len(), rows = merged.len(), "Queried bars");
        Ok(merged)
    }

    fn query_partition(
        conn: &Connection,
        table: &str,
        filter: &BarFilter,
        limit: Option<usize>,
    ) -> Result<Vec<BarRecord>> {
        let table = checked_identifier(table)?;

        let mut sql = format!(
            "SELECT code, name, datetime, open_price, high_price, low_price, close_price, volume, amount
             FROM {table} WHERE 1 = 1"
        );
        let mut args: Vec<String> = Vec::new();

        if let Some(code) = &filter.code {
            sql.push_str(" AND code = ?");
            args.push(code.clone());
        }
        if let Some(start) = filter.start_date {
            sql.push_str(" AND datetime >= ?");
            // bare date text sorts before that day's full timestamps
            args.push(start.to_string());
        }
        if let Some(end) = filter.end_date {
            sql.push_str(" AND datetime <= ?");
            args.push(format!("{end} 23:59:59"));
        }
        sql.push_str(" ORDER BY datetime, code");
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), Self::read_row)?;

        let mut bars = Vec::new();
        for row in rows {
            let (raw_datetime, bar) = row?;
            match bar {
                Some(bar) => bars.push(bar),
                None => warn!(table, datetime = %raw_datetime, "Skipping row with unreadable datetime"),
            }
        }
        Ok(bars)
    }

    fn read_row(row: &rusqlite::Row) -> rusqlite::Result<(String, Option<BarRecord>)> {
        let raw_datetime: String = row.get(2)?;
        let Ok(datetime) = parse_datetime(&raw_datetime) else {
            return Ok((raw_datetime, None));
        };

        let volume: Option<f64> = row.get(7)?;
        let amount: Option<f64> = row.get(8)?;
        let bar = BarRecord {
            code: row.get(0)?,
            name: row.get(1)?,
            datetime,
            open: row.get(3)?,
            high: row.get(4)?,
            low: row.get(5)?,
            close: row.get(6)?,
            volume: volume.unwrap_or(0.0).round() as i64,
            amount: amount.unwrap_or(0.0),
        };
        Ok((raw_datetime, Some(bar)))
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    /// One entry per known partition, all periods.
    pub fn table_statistics(&self) -> Result<Vec<TableStatistics>> {
        let conn = self.db.connect()?;
        let mut stats = Vec::new();

        for partition in self.catalog.all_partitions()? {
            let table = checked_identifier(&partition.table_name)?;
            let summary = conn.query_row(
                &format!("SELECT COUNT(*), MIN(datetime), MAX(datetime) FROM {table}"),
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            );

            let (count, min_datetime, max_datetime) = match summary {
                Ok(summary) => summary,
                Err(e) => {
                    warn!(table, error = %e, "Skipping partition in statistics");
                    continue;
                }
            };

            stats.push(TableStatistics {
                created_at: self.catalog.created_at(table)?,
                table_name: partition.table_name.clone(),
                period: partition.period,
                year_month: partition.year_month.to_string(),
                record_count: count.max(0) as u64,
                min_datetime,
                max_datetime,
            });
        }

        Ok(stats)
    }

    /// Size of the main database file.
    pub fn database_size_bytes(&self) -> u64 {
        std::fs::metadata(self.db.path())
            .map(|m| m.len())
            .unwrap_or(0)
    }

    // ========================================================================
    // Instrument catalog
    // ========================================================================

    pub fn upsert_instrument_info(
        &self,
        code: &str,
        name: &str,
        sector: Option<&str>,
        industry: Option<&str>,
    ) -> Result<()> {
        self.instruments
            .upsert_instrument_info(code, name, sector, industry)
    }

    pub fn get_instrument_info(&self, code: &str) -> Result<Option<InstrumentInfo>> {
        self.instruments.get_instrument_info(code)
    }

    pub fn list_instruments(&self) -> Result<Vec<InstrumentInfo>> {
        self.instruments.list_instruments()
    }

    pub fn upsert_etf_info(&self, etf_code: &str, etf_type: &str, etf_name: &str) -> Result<()> {
        self.instruments.upsert_etf_info(etf_code, etf_type, etf_name)
    }

    pub fn get_etf_info(&self, etf_code: &str) -> Result<Option<EtfInfo>> {
        self.instruments.get_etf_info(etf_code)
    }

    pub fn etf_types(&self) -> Result<BTreeMap<String, String>> {
        self.instruments.etf_types()
    }
}

// ============================================================================
// Tests
// ============================================================================
