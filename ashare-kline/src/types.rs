//! Core value types: sampling periods, calendar months and OHLCV bars.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

use crate::error::{Result, StoreError};

/// Storage format for bar timestamps.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Date-only format accepted on read and in range bounds.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

static YEAR_MONTH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}$").expect("static year-month pattern"));

// ============================================================================
// Period
// ============================================================================

/// Sampling period of a bar series. Each period has its own set of partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Period {
    /// 1-minute bars
    #[serde(rename = "1m")]
    M1,
    /// 5-minute bars
    #[serde(rename = "5m")]
    M5,
    /// 30-minute bars
    #[serde(rename = "30m")]
    M30,
    /// Daily bars
    #[serde(rename = "1d")]
    D1,
}

impl Period {
    /// All supported periods, finest first.
    pub const ALL: [Period; 4] = [Period::M1, Period::M5, Period::M30, Period::D1];

    /// Canonical spelling, used verbatim in partition table names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M30 => "30m",
            Self::D1 => "1d",
        }
    }

    /// Trading minutes covered by one bar
    pub fn minutes(&self) -> u32 {
        match self {
            Self::M1 => 1,
            Self::M5 => 5,
            Self::M30 => 30,
            Self::D1 => 240,
        }
    }

    pub fn is_intraday(&self) -> bool {
        !matches!(self, Self::D1)
    }
}

impl FromStr for Period {
    type Err = StoreError;

    /// Accepts the canonical form as well as the bare minute counts
    /// collectors pass around ("1", "5", "30").
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "1m" | "1" | "m1" => Ok(Self::M1),
            "5m" | "5" | "m5" => Ok(Self::M5),
            "30m" | "30" | "m30" => Ok(Self::M30),
            "1d" | "d" | "daily" => Ok(Self::D1),
            _ => Err(StoreError::InvalidPeriod(s.to_string())),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// YearMonth
// ============================================================================

/// A calendar month, the partitioning key.
///
/// Ordering is chronological, which coincides with the lexicographic order
/// of the `YYYY-MM` text form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(0..=9999).contains(&year) || !(1..=12).contains(&month) {
            return Err(StoreError::InvalidDate(format!("{year:04}-{month:02}")));
        }
        Ok(Self { year, month })
    }

    /// Month containing `date`.
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn minus_months(self, n: u32) -> Self {
        let total = self.year * 12 + (self.month as i32 - 1) - n as i32;
        Self {
            year: total.div_euclid(12),
            month: total.rem_euclid(12) as u32 + 1,
        }
    }

    /// Every month from `start` to `end`, both inclusive. Empty if `start > end`.
    pub fn range_inclusive(start: Self, end: Self) -> Vec<Self> {
        let mut months = Vec::new();
        let mut current = start;
        while current <= end {
            months.push(current);
            current = current.next();
        }
        months
    }

    /// `YYYY_MM`, the suffix used in partition table names.
    pub fn table_suffix(&self) -> String {
        format!("{:04}_{:02}", self.year, self.month)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        if !YEAR_MONTH_RE.is_match(s) {
            return Err(StoreError::InvalidDate(s.to_string()));
        }
        let year = s[..4]
            .parse()
            .map_err(|_| StoreError::InvalidDate(s.to_string()))?;
        let month = s[5..]
            .parse()
            .map_err(|_| StoreError::InvalidDate(s.to_string()))?;
        Self::new(year, month)
    }
}

// ============================================================================
// Date parsing
// ============================================================================

/// Parse a `YYYY-MM-DD` date.
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
        .map_err(|_| StoreError::InvalidDate(s.to_string()))
}

/// Parse a stored or collected timestamp. Date-only text maps to midnight.
pub fn parse_datetime(s: &str) -> Result<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, DATETIME_FORMAT) {
        return Ok(dt);
    }
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .map(|d| d.and_time(NaiveTime::MIN))
        .map_err(|_| StoreError::InvalidDate(s.to_string()))
}

pub fn format_datetime(dt: &NaiveDateTime) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

mod datetime_text {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_datetime(dt))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let text = String::deserialize(d)?;
        super::parse_datetime(&text).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Bars
// ============================================================================

/// One OHLCV sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarRecord {
    /// Instrument code (e.g. "000001", "BK0477")
    pub code: String,
    /// Display name
    pub name: String,
    /// Bar timestamp, local exchange time
    #[serde(with = "datetime_text")]
    pub datetime: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Traded volume
    pub volume: i64,
    /// Turnover in currency
    pub amount: f64,
}

impl BarRecord {
    pub fn date(&self) -> NaiveDate {
        self.datetime.date()
    }

    pub fn year_month(&self) -> YearMonth {
        YearMonth::of(self.date())
    }

    /// Reason this row cannot be stored, if any.
    pub fn defect(&self) -> Option<&'static str> {
        if self.code.trim().is_empty() {
            return Some("empty code");
        }
        if ![self.open, self.high, self.low, self.close, self.amount]
            .iter()
            .all(|v| v.is_finite())
        {
            return Some("non-finite price or amount");
        }
        if self.volume < 0 || self.amount < 0.0 {
            return Some("negative volume or amount");
        }
        None
    }
}

/// A bar as delivered by an upstream collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawBar {
    pub code: String,
    #[serde(default)]
    pub name: String,
    /// `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DD`
    pub datetime: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub amount: Option<f64>,
}

impl TryFrom<RawBar> for BarRecord {
    type Error = StoreError;

    fn try_from(raw: RawBar) -> Result<Self> {
        let datetime = parse_datetime(&raw.datetime)?;
        Ok(Self {
            code: raw.code,
            name: raw.name,
            datetime,
            open: raw.open,
            high: raw.high,
            low: raw.low,
            close: raw.close,
            volume: raw.volume.unwrap_or(0.0).round() as i64,
            amount: raw.amount.unwrap_or(0.0),
        })
    }
}

/// Sort ascending by timestamp and drop duplicate keys, keeping the
/// occurrence that came last in the input.
pub(crate) fn sort_dedup_keep_last<K, F>(mut bars: Vec<BarRecord>, key: F) -> Vec<BarRecord>
where
    K: Eq + Hash,
    F: Fn(&BarRecord) -> K,
{
    // stable: equal timestamps keep input order
    bars.sort_by(|a, b| a.datetime.cmp(&b.datetime));

    let mut seen = HashSet::new();
    let mut kept: Vec<BarRecord> = bars
        .into_iter()
        .rev()
        .filter(|bar| seen.insert(key(bar)))
        .collect();
    kept.reverse();
    kept
}

// ============================================================================
// Tests
// ============================================================================
