//! Ashare K-line - command-line access to the partitioned bar store.

use anyhow::{bail, Context, Result};
use ashare_common::logging::init_logging;
use ashare_common::util::{fit_column, format_bytes};
use ashare_common::Config;
use ashare_kline::{
    parse_date, AggregationEngine, BarFilter, BarRecord, PartitionedBarStore, Period, RawBar,
    RetentionManager, StoreConfig,
};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Month-partitioned K-line store for A-shares.
#[derive(Parser, Debug)]
#[command(name = "ashare-kline")]
#[command(version)]
#[command(about = "Month-partitioned SQLite K-line store", long_about = None)]
struct Cli {
    /// Config file (default: ~/.ashare/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show per-partition row counts and the database size
    Stats,

    /// Print stored bars as JSON lines
    Query {
        /// Period (1m, 5m, 30m, 1d)
        #[arg(short, long)]
        period: String,

        /// Instrument code
        #[arg(short, long)]
        code: Option<String>,

        /// First date, YYYY-MM-DD
        #[arg(long)]
        start: Option<String>,

        /// Last date, YYYY-MM-DD
        #[arg(long)]
        end: Option<String>,

        /// Maximum number of bars
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Print history joined with today's rolled-up ticks
    Combine {
        /// Instrument code
        code: String,

        /// Trading day to treat as today (default: local date)
        #[arg(long)]
        date: Option<String>,

        /// Fail unless at least this many bars are available
        #[arg(long)]
        min_bars: Option<usize>,
    },

    /// Load a JSON array of bars into the store
    Import {
        /// Period (1m, 5m, 30m, 1d)
        #[arg(short, long)]
        period: String,

        /// JSON file of {code, name, datetime, open, high, low, close, volume?, amount?}
        file: PathBuf,
    },

    /// Drop partitions older than the retention window once
    Cleanup {
        /// Months to keep (default: from config)
        #[arg(long)]
        keep_months: Option<u32>,
    },

    /// Run retention cleanup periodically until interrupted
    Retention,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            let mut config = Config::load_from(path)?;
            config.apply_env_overrides();
            config
        }
        None => Config::load_with_env()?,
    };

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );
    config.validate().context("Invalid configuration")?;

    let store = PartitionedBarStore::open(StoreConfig::from_config(&config.storage))?;

    match cli.command {
        Commands::Stats => print_stats(&store),
        Commands::Query {
            period,
            code,
            start,
            end,
            limit,
        } => {
            let period: Period = period.parse()?;
            let mut filter = BarFilter::new();
            filter.code = code;
            filter.start_date = start.as_deref().map(parse_date).transpose()?;
            filter.end_date = end.as_deref().map(parse_date).transpose()?;
            filter.limit = limit;

            print_bars(&store.query(period, &filter)?)
        }
        Commands::Combine {
            code,
            date,
            min_bars,
        } => {
            let engine = AggregationEngine::from_config(store, &config.aggregation)?;
            let today = match date {
                Some(d) => parse_date(&d)?,
                None => Local::now().date_naive(),
            };
            let min_bars = min_bars.unwrap_or(engine.min_bars());

            print_bars(&engine.combine_with_minimum(&code, today, min_bars)?)
        }
        Commands::Import { period, file } => {
            let period: Period = period.parse()?;
            let written = import_file(&store, period, &file)?;
            println!("Imported {written} bars into {period}");
            Ok(())
        }
        Commands::Cleanup { keep_months } => {
            let keep = keep_months.unwrap_or(config.retention.keep_months);
            if keep == 0 {
                bail!("keep-months must be at least 1");
            }
            let report = RetentionManager::new(store).cleanup(keep)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Retention => run_retention(store, &config).await,
    }
}

fn print_stats(store: &PartitionedBarStore) -> Result<()> {
    let stats = store.table_statistics()?;

    println!(
        "{} {} {} {} {}",
        fit_column("table", 20),
        fit_column("rows", 10),
        fit_column("first", 20),
        fit_column("last", 20),
        "created"
    );
    for s in &stats {
        println!(
            "{} {} {} {} {}",
            fit_column(&s.table_name, 20),
            fit_column(&s.record_count.to_string(), 10),
            fit_column(s.min_datetime.as_deref().unwrap_or("-"), 20),
            fit_column(s.max_datetime.as_deref().unwrap_or("-"), 20),
            s.created_at.as_deref().unwrap_or("-"),
        );
    }

    let total: u64 = stats.iter().map(|s| s.record_count).sum();
    println!(
        "\n{} partitions, {} rows, {} on disk ({})",
        stats.len(),
        total,
        format_bytes(store.database_size_bytes()),
        store.db_path().display()
    );
    Ok(())
}

fn print_bars(bars: &[BarRecord]) -> Result<()> {
    for bar in bars {
        println!("{}", serde_json::to_string(bar)?);
    }
    Ok(())
}

fn import_file(store: &PartitionedBarStore, period: Period, file: &Path) -> Result<usize> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let raw: Vec<RawBar> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", file.display()))?;

    let total = raw.len();
    let mut bars = Vec::with_capacity(total);
    for row in raw {
        match BarRecord::try_from(row) {
            Ok(bar) => bars.push(bar),
            Err(e) => tracing::warn!(error = %e, "Skipping unparseable bar"),
        }
    }

    let written = store.insert(period, &bars)?;
    tracing::info!(total, written, period = %period, "Import finished");
    Ok(written)
}

async fn run_retention(store: PartitionedBarStore, config: &Config) -> Result<()> {
    if !config.retention.enabled {
        bail!("Retention is disabled in the configuration");
    }

    let manager = RetentionManager::new(store);
    let every = Duration::from_secs(config.retention.interval_hours * 3600);

    tokio::select! {
        () = manager.run_periodic(config.retention.keep_months, every) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            tracing::info!("Shutting down retention loop");
        }
    }
    Ok(())
}
