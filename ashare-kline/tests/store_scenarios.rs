//! End-to-end behaviour of the store, roll-up and retention together.

use ashare_kline::{
    parse_date, parse_datetime, session_grid, AggregationEngine, BarFilter, BarRecord,
    PartitionedBarStore, Period, RetentionManager, YearMonth,
};
use chrono::{Duration, NaiveDate};
use tempfile::{tempdir, TempDir};

fn open_store() -> (TempDir, PartitionedBarStore) {
    let dir = tempdir().unwrap();
    let store = PartitionedBarStore::open_path(dir.path().join("industry_data.db")).unwrap();
    (dir, store)
}

fn bar(code: &str, datetime: &str, close: f64) -> BarRecord {
    BarRecord {
        code: code.to_string(),
        name: format!("name-{code}"),
        datetime: parse_datetime(datetime).unwrap(),
        open: close - 0.1,
        high: close + 0.2,
        low: close - 0.2,
        close,
        volume: 1_000,
        amount: close * 1_000.0,
    }
}

fn day(s: &str) -> NaiveDate {
    parse_date(s).unwrap()
}

fn partition_names(store: &PartitionedBarStore) -> Vec<String> {
    store
        .catalog()
        .all_partitions()
        .unwrap()
        .into_iter()
        .map(|d| d.table_name)
        .collect()
}

fn physical_partitions(store: &PartitionedBarStore) -> Vec<String> {
    let conn = rusqlite::Connection::open(store.db_path()).unwrap();
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE 'kline_%' ORDER BY name")
        .unwrap();
    let names = stmt.query_map([], |row| row.get(0)).unwrap();
    names.collect::<rusqlite::Result<_>>().unwrap()
}

#[test]
fn daily_bars_across_month_end_land_in_two_partitions() {
    let (_dir, store) = open_store();
    let bars = vec![
        bar("000001", "2024-02-29", 3.0),
        bar("000001", "2024-01-31", 1.0),
        bar("000001", "2024-02-01", 2.0),
    ];

    assert_eq!(store.insert(Period::D1, &bars).unwrap(), 3);
    assert_eq!(
        partition_names(&store),
        vec!["kline_1d_2024_01", "kline_1d_2024_02"]
    );

    let rows = store
        .query(Period::D1, &BarFilter::new().code("000001"))
        .unwrap();
    let dates: Vec<String> = rows.iter().map(|b| b.date().to_string()).collect();
    assert_eq!(dates, vec!["2024-01-31", "2024-02-01", "2024-02-29"]);
}

#[test]
fn last_and_first_second_of_adjacent_months() {
    let (_dir, store) = open_store();
    store
        .insert(
            Period::M1,
            &[
                bar("600000", "2024-02-01 00:00:00", 2.0),
                bar("600000", "2024-01-31 23:59:59", 1.0),
            ],
        )
        .unwrap();

    assert_eq!(
        partition_names(&store),
        vec!["kline_1m_2024_01", "kline_1m_2024_02"]
    );

    let rows = store
        .query(
            Period::M1,
            &BarFilter::new().between(day("2024-01-31"), day("2024-02-01")),
        )
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].close, 1.0);
    assert_eq!(rows[1].close, 2.0);
}

#[test]
fn round_trip_and_upsert() {
    let (_dir, store) = open_store();
    let original = bar("510300", "2024-05-20 10:30:00", 3.61);
    store.insert(Period::M30, &[original.clone()]).unwrap();

    let filter = BarFilter::new()
        .code("510300")
        .between(day("2024-05-20"), day("2024-05-20"));
    assert_eq!(store.query(Period::M30, &filter).unwrap(), vec![original]);

    let revised = bar("510300", "2024-05-20 10:30:00", 3.65);
    store.insert(Period::M30, &[revised.clone()]).unwrap();
    assert_eq!(store.query(Period::M30, &filter).unwrap(), vec![revised]);
}

#[test]
fn limit_across_three_months_returns_most_recent() {
    let (_dir, store) = open_store();
    let mut bars = Vec::new();
    for (i, month) in ["2024-01", "2024-02", "2024-03"].iter().enumerate() {
        for (j, time) in ["09:35:00", "09:40:00", "09:45:00"].iter().enumerate() {
            bars.push(bar("000001", &format!("{month}-10 {time}"), (i * 10 + j) as f64));
        }
    }
    store.insert(Period::M5, &bars).unwrap();

    let rows = store
        .query(
            Period::M5,
            &BarFilter::new()
                .code("000001")
                .between(day("2024-01-01"), day("2024-03-31"))
                .limit(4),
        )
        .unwrap();

    let closes: Vec<f64> = rows.iter().map(|b| b.close).collect();
    assert_eq!(closes, vec![12.0, 20.0, 21.0, 22.0]);
}

#[test]
fn query_results_have_unique_keys_and_ascending_time() {
    let (_dir, store) = open_store();
    let mut bars = Vec::new();
    for code in ["000001", "000002"] {
        for d in ["2024-01-30", "2024-02-01", "2024-02-02"] {
            bars.push(bar(code, d, 1.0));
        }
    }
    store.insert(Period::D1, &bars).unwrap();
    store.insert(Period::D1, &bars).unwrap();

    let rows = store.query(Period::D1, &BarFilter::new()).unwrap();
    assert_eq!(rows.len(), 6);
    assert!(rows.windows(2).all(|w| w[0].datetime <= w[1].datetime));

    let mut keys: Vec<_> = rows.iter().map(|b| (b.code.clone(), b.datetime)).collect();
    keys.dedup();
    assert_eq!(keys.len(), 6);
}

#[test]
fn stitched_series_is_continuous() {
    let (_dir, store) = open_store();
    let engine = AggregationEngine::new(store.clone());
    let today = day("2024-03-15");

    let history: Vec<BarRecord> = session_grid(day("2024-03-14"), 5)
        .into_iter()
        .map(|t| BarRecord {
            datetime: t,
            ..bar("000001", "2024-03-14", 9.0)
        })
        .collect();
    store.insert(Period::M5, &history).unwrap();

    // one tick per minute from 09:30 to 10:30
    let start = parse_datetime("2024-03-15 09:30:00").unwrap();
    let ticks: Vec<BarRecord> = (0..=60)
        .map(|m| BarRecord {
            datetime: start + Duration::minutes(m),
            ..bar("000001", "2024-03-15", 10.0 + m as f64 / 100.0)
        })
        .collect();
    engine.ingest(&ticks).unwrap();

    let series = engine.combine("000001", today).unwrap();
    assert_eq!(series.len(), 50 + 13);
    assert!(series.windows(2).all(|w| w[0].datetime < w[1].datetime));

    let todays: Vec<_> = series.iter().filter(|b| b.date() == today).collect();
    assert!(todays
        .windows(2)
        .all(|w| w[1].datetime - w[0].datetime <= Duration::minutes(5)));

    let last = todays.last().unwrap();
    assert_eq!(last.close, 10.6);
}

#[test]
fn retention_keeps_window_untouched() {
    let (_dir, store) = open_store();
    let months = ["2023-10", "2023-11", "2023-12", "2024-01", "2024-02", "2024-05"];
    let bars: Vec<BarRecord> = months
        .iter()
        .map(|m| bar("000001", &format!("{m}-15"), 1.0))
        .collect();
    store.insert(Period::D1, &bars).unwrap();
    store
        .insert(Period::M5, &[bar("000001", "2023-12-15 10:00:00", 1.0)])
        .unwrap();

    let today = day("2024-06-03");
    let report = RetentionManager::new(store.clone())
        .cleanup_as_of(6, today)
        .unwrap();
    assert_eq!(report.cutoff, "2023-12");
    assert_eq!(report.dropped, vec!["kline_1d_2023_10", "kline_1d_2023_11"]);

    let cutoff: YearMonth = "2023-12".parse().unwrap();
    for partition in store.catalog().all_partitions().unwrap() {
        assert!(partition.year_month >= cutoff);
    }
    assert_eq!(partition_names(&store).len(), 5);

    let tables = physical_partitions(&store);
    assert!(!tables.contains(&"kline_1d_2023_10".to_string()));
    assert!(!tables.contains(&"kline_1d_2023_11".to_string()));
    assert_eq!(tables, partition_names(&store));

    for stats in store.table_statistics().unwrap() {
        assert_eq!(stats.record_count, 1);
    }
}

#[test]
fn concurrent_writers_to_a_new_month() {
    let (_dir, store) = open_store();

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let store = store.clone();
            std::thread::spawn(move || {
                let code = format!("00000{i}");
                store.insert(Period::M5, &[bar(&code, "2024-08-01 09:35:00", 1.0)])
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap().unwrap(), 1);
    }

    assert_eq!(partition_names(&store), vec!["kline_5m_2024_08"]);
    assert_eq!(store.query(Period::M5, &BarFilter::new()).unwrap().len(), 6);
}
