//! Ashare K-line Store
//!
//! Embedded storage for A-share OHLCV bars, partitioned by sampling period
//! and calendar month, with on-demand roll-up of live ticks.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  ticks   ┌──────────────────┐  rows   ┌─────────────────────┐
//! │  Collector   │ ───────▶ │ AggregationEngine│ ──────▶ │ PartitionedBarStore │
//! │ (BarSource)  │          │  roll-up/combine │ ◀────── │  kline_<p>_<yyyy>_<mm>
//! └──────────────┘          └──────────────────┘         └─────────┬───────────┘
//!                                                                  │
//!                          ┌──────────────────┐          ┌─────────▼───────────┐
//!                          │ RetentionManager │ ───────▶ │   SchemaCatalog     │
//!                          └──────────────────┘          │    (table_info)     │
//!                                                        └─────────────────────┘
//! ```
//!
//! # Key Concepts
//!
//! ## Partitions
//! - One table per (period, month), created on first write
//! - Recorded in `table_info`; range queries plan from the catalog alone
//!
//! ## Session grid
//! - 09:30–11:30 and 13:00–15:00, both ends included
//! - A bar is keyed by the end of the interval it covers
//!
//! ## Stitching
//! - History for the native period comes from partitions, up to yesterday
//! - Today comes from rolling up stored 1-minute ticks

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod aggregation;
pub mod cache;
pub mod catalog;
pub mod collector;
mod db;
pub mod error;
pub mod instruments;
pub mod retention;
pub mod session;
pub mod store;
pub mod types;

pub use aggregation::{roll_up, AggregationEngine};
pub use cache::{CacheStats, EtfCache};
pub use catalog::{partition_table_name, PartitionDescriptor, SchemaCatalog};
pub use collector::{BarSource, CollectReport, Collector, Instrument, InstrumentKind, Snapshot};
pub use db::Deadline;
pub use error::{Result, StoreError};
pub use instruments::{EtfInfo, InstrumentCatalog, InstrumentInfo};
pub use retention::{retention_cutoff, CleanupReport, RetentionManager};
pub use session::{assign_bucket, is_trading_time, session_grid};
pub use store::{BarFilter, PartitionedBarStore, StoreConfig, TableStatistics};
pub use types::{parse_date, parse_datetime, BarRecord, Period, RawBar, YearMonth};
