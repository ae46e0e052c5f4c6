//! Month-granular retention.
//!
//! Whole partitions are dropped once their month falls before the cutoff;
//! rows are never deleted individually. Callers must not ingest into the
//! partitions being dropped while a cleanup runs.

use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::time::Duration;
use tokio::time::interval;
use tracing::{info, warn};

use crate::error::Result;
use crate::store::PartitionedBarStore;
use crate::types::YearMonth;

/// First month that survives a cleanup run on `today`.
pub fn retention_cutoff(today: NaiveDate, keep_months: u32) -> YearMonth {
    YearMonth::of(today).minus_months(keep_months)
}

/// Outcome of one cleanup run.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    /// Partitions of this month and later were kept
    pub cutoff: String,
    pub dropped: Vec<String>,
    pub failed: Vec<String>,
}

impl CleanupReport {
    pub fn dropped_count(&self) -> usize {
        self.dropped.len()
    }
}

/// Drops partitions older than a rolling window.
#[derive(Debug, Clone)]
pub struct RetentionManager {
    store: PartitionedBarStore,
}

impl RetentionManager {
    pub fn new(store: PartitionedBarStore) -> Self {
        Self { store }
    }

    /// Keep the current month plus the `keep_months` before it.
    pub fn cleanup(&self, keep_months: u32) -> Result<CleanupReport> {
        self.cleanup_as_of(keep_months, Local::now().date_naive())
    }

    /// [`cleanup`](Self::cleanup) relative to a fixed `today`.
    ///
    /// A partition that fails to drop is logged and reported; the run
    /// carries on with the rest.
    pub fn cleanup_as_of(&self, keep_months: u32, today: NaiveDate) -> Result<CleanupReport> {
        let cutoff = retention_cutoff(today, keep_months);
        let catalog = self.store.catalog();

        let mut report = CleanupReport {
            cutoff: cutoff.to_string(),
            dropped: Vec::new(),
            failed: Vec::new(),
        };

        for partition in catalog.partitions_before(cutoff)? {
            match catalog.drop_partition(&partition) {
                Ok(()) => report.dropped.push(partition.table_name),
                Err(e) => {
                    warn!(table = %partition.table_name, error = %e, "Failed to drop partition");
                    report.failed.push(partition.table_name);
                }
            }
        }

        info!(
            cutoff = %report.cutoff,
            dropped = report.dropped.len(),
            failed = report.failed.len(),
            "Retention cleanup finished"
        );
        Ok(report)
    }

    /// Run [`cleanup`](Self::cleanup) now and then every `every`, forever.
    ///
    /// Failures are logged; the loop never exits on its own.
    pub async fn run_periodic(&self, keep_months: u32, every: Duration) {
        info!(
            keep_months,
            interval_secs = every.as_secs(),
            "Starting retention loop"
        );

        let mut ticker = interval(every);
        loop {
            ticker.tick().await;

            let manager = self.clone();
            match tokio::task::spawn_blocking(move || manager.cleanup(keep_months)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(error = %e, "Retention cleanup failed"),
                Err(e) => warn!(error = %e, "Retention task panicked"),
            }
        }
    }
}
