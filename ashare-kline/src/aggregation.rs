//! Intraday roll-up and history stitching.
//!
//! Live collection stores fine ticks (1-minute bars by default) while the
//! analysis series is kept at a coarser native period (5-minute by default).
//! Today's ticks are rolled up onto the session grid on demand and joined to
//! the persisted history, so callers see one continuous series.

use ashare_common::AggregationConfig;
use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::session::{assign_bucket, session_grid};
use crate::store::{BarFilter, PartitionedBarStore};
use crate::types::{sort_dedup_keep_last, BarRecord, Period};

/// Collapse a non-empty, time-ordered run of samples into one bar.
fn fold_bucket(samples: &[&BarRecord], datetime: NaiveDateTime) -> Option<BarRecord> {
    let first = samples.first()?;
    let last = samples.last()?;

    Some(BarRecord {
        code: first.code.clone(),
        name: last.name.clone(),
        datetime,
        open: first.open,
        high: samples
            .iter()
            .map(|s| s.high)
            .fold(f64::NEG_INFINITY, f64::max),
        low: samples.iter().map(|s| s.low).fold(f64::INFINITY, f64::min),
        close: last.close,
        volume: samples.iter().map(|s| s.volume).sum(),
        amount: samples.iter().map(|s| s.amount).sum(),
    })
}

/// Roll finer bars up into `target` bars.
///
/// Input may mix instruments and days and need not be sorted. Intraday
/// targets bucket each sample onto that day's session grid; empty buckets
/// produce nothing. A daily target yields one bar per instrument per day,
/// stamped at midnight. Output is ascending by datetime, then code.
pub fn roll_up(ticks: &[BarRecord], target: Period) -> Vec<BarRecord> {
    let mut ordered: Vec<&BarRecord> = ticks.iter().collect();
    ordered.sort_by(|a, b| a.datetime.cmp(&b.datetime));

    let mut days: BTreeMap<(&str, NaiveDate), Vec<&BarRecord>> = BTreeMap::new();
    for tick in ordered {
        days.entry((tick.code.as_str(), tick.date()))
            .or_default()
            .push(tick);
    }

    let mut bars = Vec::new();
    for ((_, date), samples) in days {
        if !target.is_intraday() {
            bars.extend(fold_bucket(&samples, date.and_time(NaiveTime::MIN)));
            continue;
        }

        let grid = session_grid(date, target.minutes());
        let mut buckets: BTreeMap<NaiveDateTime, Vec<&BarRecord>> = BTreeMap::new();
        for sample in samples {
            if let Some(boundary) = assign_bucket(&grid, sample.datetime) {
                buckets.entry(boundary).or_default().push(sample);
            }
        }

        bars.extend(
            buckets
                .into_iter()
                .filter_map(|(boundary, members)| fold_bucket(&members, boundary)),
        );
    }

    bars.sort_by(|a, b| a.datetime.cmp(&b.datetime).then_with(|| a.code.cmp(&b.code)));
    bars
}

/// Joins live ticks with stored history for one instrument at a time.
#[derive(Debug, Clone)]
pub struct AggregationEngine {
    store: PartitionedBarStore,
    tick_period: Period,
    native_period: Period,
    min_bars: usize,
}

impl AggregationEngine {
    /// Ticks at 1 minute, history at 5 minutes, 60 bars minimum.
    pub fn new(store: PartitionedBarStore) -> Self {
        Self {
            store,
            tick_period: Period::M1,
            native_period: Period::M5,
            min_bars: 60,
        }
    }

    pub fn from_config(store: PartitionedBarStore, config: &AggregationConfig) -> Result<Self> {
        let tick_period: Period = config.tick_period.parse()?;
        let native_period: Period = config.native_period.parse()?;
        if tick_period.minutes() > native_period.minutes() {
            return Err(StoreError::InvalidPeriod(format!(
                "tick period {tick_period} is coarser than native period {native_period}"
            )));
        }

        Ok(Self {
            store,
            tick_period,
            native_period,
            min_bars: config.min_bars,
        })
    }

    pub fn with_periods(mut self, tick_period: Period, native_period: Period) -> Self {
        self.tick_period = tick_period;
        self.native_period = native_period;
        self
    }

    pub fn tick_period(&self) -> Period {
        self.tick_period
    }

    pub fn native_period(&self) -> Period {
        self.native_period
    }

    pub fn min_bars(&self) -> usize {
        self.min_bars
    }

    pub fn store(&self) -> &PartitionedBarStore {
        &self.store
    }

    /// Store raw ticks in the tick period's partitions.
    pub fn ingest(&self, ticks: &[BarRecord]) -> Result<usize> {
        self.store.insert(self.tick_period, ticks)
    }

    /// `code`'s ticks for `date`, rolled up to the native period.
    pub fn rollup_for(&self, code: &str, date: NaiveDate) -> Result<Vec<BarRecord>> {
        let ticks = self.store.query(
            self.tick_period,
            &BarFilter::new().code(code).between(date, date),
        )?;
        Ok(roll_up(&ticks, self.native_period))
    }

    /// Write a finished day's roll-up into the native period's partitions.
    pub fn persist_rollup(&self, code: &str, date: NaiveDate) -> Result<usize> {
        let bars = self.rollup_for(code, date)?;
        if bars.is_empty() {
            return Ok(0);
        }
        let written = self.store.insert(self.native_period, &bars)?;
        debug!(code, %date, written, "Persisted roll-up");
        Ok(written)
    }

    /// Continuous native-period series for `code`: history before `today`
    /// followed by today's rolled-up ticks.
    ///
    /// Either half may be empty. Where both have a bar at the same timestamp
    /// the live bar wins.
    pub fn combine(&self, code: &str, today: NaiveDate) -> Result<Vec<BarRecord>> {
        let live = self.rollup_for(code, today)?;

        let history = match today.pred_opt() {
            Some(yesterday) => self.store.query(
                self.native_period,
                &BarFilter::new().code(code).end(yesterday),
            )?,
            None => Vec::new(),
        };

        let (history_len, live_len) = (history.len(), live.len());
        let mut series = history;
        series.extend(live);
        let series = sort_dedup_keep_last(series, |b| b.datetime);

        debug!(code, history = history_len, live = live_len, total = series.len(), "Combined series");
        Ok(series)
    }

    /// [`combine`](Self::combine) for the local calendar day.
    pub fn combine_today(&self, code: &str) -> Result<Vec<BarRecord>> {
        self.combine(code, Local::now().date_naive())
    }

    /// [`combine`](Self::combine), failing when fewer than `min_bars` bars
    /// are available instead of returning a short series.
    pub fn combine_with_minimum(
        &self,
        code: &str,
        today: NaiveDate,
        min_bars: usize,
    ) -> Result<Vec<BarRecord>> {
        let series = self.combine(code, today)?;
        if series.len() < min_bars {
            return Err(StoreError::InsufficientData {
                code: code.to_string(),
                required: min_bars,
                available: series.len(),
            });
        }
        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{format_datetime, parse_date, parse_datetime};
    use tempfile::{tempdir, TempDir};

    fn tick(dt: &str, open: f64, high: f64, low: f64, close: f64, volume: i64) -> BarRecord {
        BarRecord {
            code: "000001".to_string(),
            name: "平安银行".to_string(),
            datetime: parse_datetime(dt).unwrap(),
            open,
            high,
            low,
            close,
            volume,
            amount: volume as f64 * close,
        }
    }

    fn create_test_engine() -> (TempDir, AggregationEngine) {
        let dir = tempdir().unwrap();
        let store = PartitionedBarStore::open_path(dir.path().join("agg.db")).unwrap();
        (dir, AggregationEngine::new(store))
    }

    fn opening_ticks() -> Vec<BarRecord> {
        vec![
            tick("2024-03-15 09:30:00", 10.0, 10.2, 9.9, 10.1, 100),
            tick("2024-03-15 09:31:00", 10.1, 10.3, 10.0, 10.3, 200),
            tick("2024-03-15 09:32:00", 10.3, 10.4, 10.2, 10.2, 150),
            tick("2024-03-15 09:33:00", 10.2, 10.6, 10.1, 10.4, 120),
            tick("2024-03-15 09:34:00", 10.4, 10.5, 9.8, 10.4, 90),
            tick("2024-03-15 09:35:00", 10.4, 10.5, 10.3, 10.5, 80),
        ]
    }

    #[test]
    fn test_roll_up_five_minutes() {
        let bars = roll_up(&opening_ticks(), Period::M5);

        // 09:30 sits on the first boundary; 09:31..=09:35 form the 09:35 bar
        assert_eq!(bars.len(), 2);
        assert_eq!(format_datetime(&bars[0].datetime), "2024-03-15 09:30:00");
        assert_eq!(bars[0].close, 10.1);

        let b = &bars[1];
        assert_eq!(format_datetime(&b.datetime), "2024-03-15 09:35:00");
        assert_eq!(b.open, 10.1);
        assert_eq!(b.close, 10.5);
        assert_eq!(b.high, 10.6);
        assert_eq!(b.low, 9.8);
        assert_eq!(b.volume, 200 + 150 + 120 + 90 + 80);
    }

    #[test]
    fn test_roll_up_ignores_input_order() {
        let mut shuffled = opening_ticks();
        shuffled.reverse();
        assert_eq!(roll_up(&shuffled, Period::M5), roll_up(&opening_ticks(), Period::M5));
    }

    #[test]
    fn test_roll_up_is_sparse() {
        let ticks = vec![
            tick("2024-03-15 09:41:00", 1.0, 1.0, 1.0, 1.0, 1),
            tick("2024-03-15 14:02:00", 2.0, 2.0, 2.0, 2.0, 1),
        ];
        let bars = roll_up(&ticks, Period::M5);
        let times: Vec<String> = bars.iter().map(|b| format_datetime(&b.datetime)).collect();
        assert_eq!(times, vec!["2024-03-15 09:45:00", "2024-03-15 14:05:00"]);
    }

    #[test]
    fn test_roll_up_daily() {
        let mut ticks = opening_ticks();
        ticks.push(tick("2024-03-18 09:31:00", 11.0, 11.0, 11.0, 11.0, 5));
        let mut other = tick("2024-03-15 10:00:00", 5.0, 5.0, 5.0, 5.0, 7);
        other.code = "600000".into();
        ticks.push(other);

        let bars = roll_up(&ticks, Period::D1);
        assert_eq!(bars.len(), 3);
        assert_eq!(format_datetime(&bars[0].datetime), "2024-03-15 00:00:00");
        assert_eq!(bars[0].code, "000001");
        assert_eq!(bars[0].open, 10.0);
        assert_eq!(bars[0].close, 10.5);
        assert_eq!(bars[1].code, "600000");
        assert_eq!(bars[2].volume, 5);
    }

    #[test]
    fn test_roll_up_empty() {
        assert!(roll_up(&[], Period::M5).is_empty());
    }

    #[test]
    fn test_combine_history_and_live() {
        let (_dir, engine) = create_test_engine();
        let today = parse_date("2024-03-15").unwrap();

        let history = vec![
            tick("2024-03-14 14:55:00", 9.0, 9.1, 8.9, 9.0, 10),
            tick("2024-03-14 15:00:00", 9.0, 9.2, 9.0, 9.1, 10),
            // stored bar for today, ignored in favour of the live roll-up
            tick("2024-03-15 09:35:00", 1.0, 1.0, 1.0, 1.0, 1),
        ];
        engine.store().insert(Period::M5, &history).unwrap();
        engine.ingest(&opening_ticks()).unwrap();

        let series = engine.combine("000001", today).unwrap();
        let times: Vec<String> = series.iter().map(|b| format_datetime(&b.datetime)).collect();
        assert_eq!(
            times,
            vec![
                "2024-03-14 14:55:00",
                "2024-03-14 15:00:00",
                "2024-03-15 09:30:00",
                "2024-03-15 09:35:00",
            ]
        );
        assert_eq!(series[3].close, 10.5);
    }

    #[test]
    fn test_combine_without_ticks_is_history() {
        let (_dir, engine) = create_test_engine();
        engine
            .store()
            .insert(Period::M5, &[tick("2024-03-14 15:00:00", 9.0, 9.2, 9.0, 9.1, 10)])
            .unwrap();

        let series = engine
            .combine("000001", parse_date("2024-03-15").unwrap())
            .unwrap();
        assert_eq!(series.len(), 1);
    }

    #[test]
    fn test_combine_with_minimum() {
        let (_dir, engine) = create_test_engine();
        engine.ingest(&opening_ticks()).unwrap();
        let today = parse_date("2024-03-15").unwrap();

        assert_eq!(engine.combine_with_minimum("000001", today, 2).unwrap().len(), 2);

        match engine.combine_with_minimum("000001", today, 60) {
            Err(StoreError::InsufficientData { required, available, .. }) => {
                assert_eq!(required, 60);
                assert_eq!(available, 2);
            }
            other => panic!("expected insufficient data, got {other:?}"),
        }
    }

    #[test]
    fn test_persist_rollup() {
        let (_dir, engine) = create_test_engine();
        engine.ingest(&opening_ticks()).unwrap();
        let day = parse_date("2024-03-15").unwrap();

        assert_eq!(engine.persist_rollup("000001", day).unwrap(), 2);

        let stored = engine
            .store()
            .query(Period::M5, &BarFilter::new().code("000001"))
            .unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].volume, 640);
    }

    #[test]
    fn test_from_config_rejects_unknown_period() {
        let (_dir, engine) = create_test_engine();
        let config = AggregationConfig {
            native_period: "15m".into(),
            ..Default::default()
        };
        let err = AggregationEngine::from_config(engine.store().clone(), &config).unwrap_err();
        assert!(err.is_usage());
    }

    #[test]
    fn test_from_config_rejects_coarse_ticks() {
        let (_dir, engine) = create_test_engine();
        let config = AggregationConfig {
            tick_period: "30m".into(),
            native_period: "5m".into(),
            ..Default::default()
        };
        let err = AggregationEngine::from_config(engine.store().clone(), &config).unwrap_err();
        assert!(matches!(err, StoreError::InvalidPeriod(_)));
    }
}
