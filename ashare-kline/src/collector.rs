//! Boundary with upstream data collectors.
//!
//! A [`BarSource`] knows how to list and fetch one kind of instrument
//! (stocks, ETFs, indices, sector boards). The [`Collector`] drives sources
//! into the store; the store itself never sees instrument kinds.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

use crate::store::PartitionedBarStore;
use crate::types::{BarRecord, Period, RawBar};

// ============================================================================
// Instruments
// ============================================================================

/// Closed set of instrument kinds that feed the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentKind {
    Stock,
    Etf,
    Index,
    Sector,
}

impl InstrumentKind {
    /// Label recorded as the instrument's `sector` classification.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Stock => "Stock",
            Self::Etf => "ETF",
            Self::Index => "Index",
            Self::Sector => "Sector",
        }
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// An instrument as listed by a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub code: String,
    pub name: String,
    pub kind: InstrumentKind,
    #[serde(default)]
    pub industry: Option<String>,
}

/// Latest price of an instrument at collection time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub code: String,
    pub name: String,
    pub price: f64,
    #[serde(default)]
    pub volume: i64,
    #[serde(default)]
    pub amount: f64,
}

// ============================================================================
// Sources
// ============================================================================

/// Upstream market data for one instrument kind.
#[async_trait]
pub trait BarSource: Send + Sync {
    fn kind(&self) -> InstrumentKind;

    /// Instruments this source covers.
    async fn list_instruments(&self) -> Result<Vec<Instrument>>;

    /// Historical bars of `period` for one instrument.
    async fn fetch_bars(&self, instrument: &Instrument, period: Period) -> Result<Vec<RawBar>>;

    /// Current prices for every covered instrument.
    async fn fetch_snapshots(&self) -> Result<Vec<Snapshot>>;
}

/// Result of a history collection run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectReport {
    pub instruments: usize,
    pub bars_written: usize,
    /// Codes whose fetch or insert failed
    pub failed: Vec<String>,
}

// ============================================================================
// Collector
// ============================================================================

/// Moves data from sources into the store.
#[derive(Debug, Clone)]
pub struct Collector {
    store: PartitionedBarStore,
}

impl Collector {
    pub fn new(store: PartitionedBarStore) -> Self {
        Self { store }
    }

    /// Fetch and store `period` history for every instrument of `source`.
    ///
    /// One failing instrument is logged and recorded; the rest continue.
    pub async fn collect_history(&self, source: &dyn BarSource, period: Period) -> Result<CollectReport> {
        let kind = source.kind();
        let instruments = source
            .list_instruments()
            .await
            .with_context(|| format!("Failed to list {kind} instruments"))?;

        let mut report = CollectReport {
            instruments: instruments.len(),
            ..Default::default()
        };

        for instrument in &instruments {
            match self.collect_instrument(source, instrument, period).await {
                Ok(written) => report.bars_written += written,
                Err(e) => {
                    warn!(code = %instrument.code, kind = %kind, error = %e, "Failed to collect history");
                    report.failed.push(instrument.code.clone());
                }
            }
        }

        info!(
            kind = %kind,
            period = %period,
            instruments = report.instruments,
            written = report.bars_written,
            failed = report.failed.len(),
            "Collected history"
        );
        Ok(report)
    }

    async fn collect_instrument(
        &self,
        source: &dyn BarSource,
        instrument: &Instrument,
        period: Period,
    ) -> Result<usize> {
        let raw = source.fetch_bars(instrument, period).await?;

        let mut bars = Vec::with_capacity(raw.len());
        for mut row in raw {
            if row.code.is_empty() {
                row.code = instrument.code.clone();
            }
            if row.name.is_empty() {
                row.name = instrument.name.clone();
            }
            match BarRecord::try_from(row) {
                Ok(bar) => bars.push(bar),
                Err(e) => debug!(code = %instrument.code, error = %e, "Dropping unparseable bar"),
            }
        }

        self.store.upsert_instrument_info(
            &instrument.code,
            &instrument.name,
            Some(instrument.kind.label()),
            instrument.industry.as_deref(),
        )?;
        Ok(self.store.insert(period, &bars)?)
    }

    /// Store one 1-minute bar per snapshot, stamped at `at` truncated to the
    /// minute. Open, high, low and close all take the snapshot price.
    pub async fn record_snapshots(&self, source: &dyn BarSource, at: NaiveDateTime) -> Result<usize> {
        let snapshots = source
            .fetch_snapshots()
            .await
            .with_context(|| format!("Failed to fetch {} snapshots", source.kind()))?;

        let minute = at
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(at);

        let bars: Vec<BarRecord> = snapshots
            .into_iter()
            .map(|s| BarRecord {
                code: s.code,
                name: s.name,
                datetime: minute,
                open: s.price,
                high: s.price,
                low: s.price,
                close: s.price,
                volume: s.volume,
                amount: s.amount,
            })
            .collect();

        let written = self.store.insert(Period::M1, &bars)?;
        debug!(kind = %source.kind(), written, "Recorded snapshots");
        Ok(written)
    }
}
