//! A-share trading session calendar arithmetic.
//!
//! Intraday bars are keyed by the *end* of their interval: the 09:35 bar of
//! the 5-minute grid covers (09:30, 09:35].

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

const MORNING_OPEN: u32 = 9 * 60 + 30;
const MORNING_CLOSE: u32 = 11 * 60 + 30;
const AFTERNOON_OPEN: u32 = 13 * 60;
const AFTERNOON_CLOSE: u32 = 15 * 60;

/// Continuous trading sessions as (open, close) minute-of-day, both inclusive.
pub const SESSIONS: [(u32, u32); 2] = [
    (MORNING_OPEN, MORNING_CLOSE),
    (AFTERNOON_OPEN, AFTERNOON_CLOSE),
];

/// Bucket boundaries for one trading day, ascending.
///
/// Every `step_minutes` from 09:30 to 11:30 and from 13:00 to 15:00, ends
/// included: 242 points for 1 minute, 50 for 5 and 10 for 30.
pub fn session_grid(date: NaiveDate, step_minutes: u32) -> Vec<NaiveDateTime> {
    if step_minutes == 0 {
        return Vec::new();
    }

    let midnight = date.and_time(NaiveTime::MIN);
    SESSIONS
        .iter()
        .flat_map(|&(open, close)| (open..=close).step_by(step_minutes as usize))
        .map(|minute| midnight + Duration::minutes(i64::from(minute)))
        .collect()
}

/// Grid point that absorbs a sample taken at `at`.
///
/// The first boundary takes everything at or before it (pre-market ticks
/// included), each later boundary takes the half-open interval after its
/// predecessor, and samples past the last boundary fold into it.
/// Returns `None` only for an empty grid.
pub fn assign_bucket(grid: &[NaiveDateTime], at: NaiveDateTime) -> Option<NaiveDateTime> {
    let idx = grid.partition_point(|boundary| *boundary < at);
    grid.get(idx).or_else(|| grid.last()).copied()
}

/// Whether collectors should be sampling at `time`.
///
/// Wider than the continuous sessions: opens at 09:25 for the call auction
/// result and reopens at 12:59 so the 13:00 print is not missed.
pub fn is_trading_time(time: NaiveTime) -> bool {
    let secs = time.num_seconds_from_midnight();
    let within = |from_min: u32, to_min: u32| secs >= from_min * 60 && secs <= to_min * 60;

    within(9 * 60 + 25, MORNING_CLOSE) || within(12 * 60 + 59, AFTERNOON_CLOSE)
}
