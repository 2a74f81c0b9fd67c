//! MarketLake CLI: pipeline jobs, reporting and the scheduler.
//!
//! Commands:
//! - `extract` / `full`: incremental extract and load (plus transform and quality for `full`)
//! - `csv-load`: load CSV exports from a directory
//! - `transform` / `quality`: rerun a stage over a date range
//! - `backfill`: extract, load and transform each trading day in a range
//! - `report` / `stats`: warehouse summaries
//! - `export`: wide CSV of stock bars with yields and reference closes
//! - `schedule`: run the tick scheduler in the foreground

mod logging;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use marketlake_core::data::{CircuitBreaker, FmpProvider};
use marketlake_core::domain::TimeRange;
use marketlake_runner::{
    Clock, JobFailure, Pipeline, PipelineConfig, RunSummary, Scheduler, SystemClock, Tick, Warehouse,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "marketlake", about = "MarketLake: market data ELT into a SQLite warehouse")]
struct Cli {
    /// Path to the TOML config. Defaults are used when the file is absent.
    #[arg(long, global = true, default_value = "marketlake.toml")]
    config: PathBuf,

    /// Emit logs as JSON (also MARKETLAKE_LOG_FORMAT=json).
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract the trailing incremental window and load it.
    Extract,
    /// Load CSV files from DIR/{stocks,indexes,commodities,bonds}.
    CsvLoad {
        dir: PathBuf,

        /// Leave files in place instead of moving them to DIR/archive.
        #[arg(long, default_value_t = false)]
        keep: bool,
    },
    /// Recompute indicators, aggregates and summaries.
    Transform {
        /// First date (YYYY-MM-DD). Defaults to the incremental window.
        #[arg(long)]
        start_date: Option<NaiveDate>,

        /// Last date (YYYY-MM-DD).
        #[arg(long)]
        end_date: Option<NaiveDate>,
    },
    /// Run the data quality checks.
    Quality {
        #[arg(long)]
        start_date: Option<NaiveDate>,

        #[arg(long)]
        end_date: Option<NaiveDate>,
    },
    /// Extract, load, transform, quality and cleanup for the incremental window.
    Full,
    /// Print the weekly report.
    Report {
        /// Also write the report as JSON.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Extract, load and transform every trading day in a range.
    Backfill {
        #[arg(long)]
        start_date: NaiveDate,

        #[arg(long)]
        end_date: NaiveDate,
    },
    /// Write stock bars with the yields and reference closes in effect at each bar.
    Export {
        /// Destination CSV file.
        #[arg(long, default_value = "market_data_export.csv")]
        output: PathBuf,

        #[arg(long)]
        start_date: Option<NaiveDate>,

        #[arg(long)]
        end_date: Option<NaiveDate>,
    },
    /// Per-table counts for rows loaded recently.
    Stats {
        /// Look back this many hours.
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },
    /// Run the scheduler in the foreground.
    Schedule {
        /// Stop after this many ticks.
        #[arg(long)]
        max_ticks: Option<usize>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(logging::wants_json(cli.log_json));
    if let Ok(path) = dotenvy::dotenv() {
        tracing::debug!(path = %path.display(), "loaded .env");
    }

    let config = PipelineConfig::load_or_default(&cli.config)
        .with_context(|| format!("failed to load config {}", cli.config.display()))?;
    let warehouse = Warehouse::open(&config.warehouse.path)
        .with_context(|| format!("failed to open warehouse {}", config.warehouse.path.display()))?;
    let needs_provider = matches!(
        cli.command,
        Commands::Extract | Commands::Full | Commands::Backfill { .. } | Commands::Schedule { .. }
    );
    let mut pipeline = Pipeline::new(config, warehouse)?;
    if needs_provider {
        let provider = build_provider(pipeline.config())?;
        pipeline = pipeline.with_provider(Box::new(provider));
    }

    let outcome = match cli.command {
        Commands::Extract => {
            let window = pipeline.incremental_window(Utc::now());
            pipeline.extract_load(window)
        }
        Commands::CsvLoad { dir, keep } => run_csv_load(&mut pipeline, &dir, keep)?,
        Commands::Transform { start_date, end_date } => {
            let range = date_range(&pipeline, start_date, end_date);
            pipeline.transform(range)
        }
        Commands::Quality { start_date, end_date } => {
            let range = date_range(&pipeline, start_date, end_date);
            let (summary, report) = pipeline.quality(range, Utc::now())?;
            for r in &report.results {
                println!("{:<20} {:<5} {}", r.check_name, r.status.as_str(), r.message);
            }
            Ok(summary)
        }
        Commands::Full => pipeline.full(Utc::now()),
        Commands::Report { output } => return run_report(&mut pipeline, output.as_deref()),
        Commands::Backfill { start_date, end_date } => pipeline.backfill(start_date, end_date),
        Commands::Export {
            output,
            start_date,
            end_date,
        } => {
            let range = date_range(&pipeline, start_date, end_date);
            return run_export(&mut pipeline, range, &output);
        }
        Commands::Stats { hours } => return run_stats(&pipeline, hours),
        Commands::Schedule { max_ticks } => return run_schedule(&mut pipeline, max_ticks),
    };

    let summary = match outcome {
        Ok(summary) => summary,
        Err(failure) => {
            println!("{}", failure.summary.render());
            eprintln!("error: {:#}", anyhow::Error::from(failure.error));
            std::process::exit(1);
        }
    };
    println!("{}", summary.render());
    if summary.quality_gate_failed {
        eprintln!("quality gate failed: {} check(s) reported FAIL", summary.checks_failed);
        std::process::exit(1);
    }
    Ok(())
}

fn build_provider(config: &PipelineConfig) -> Result<FmpProvider> {
    let api_key = config.api.api_key()?;
    let provider = FmpProvider::new(
        config.api.base_url.clone(),
        api_key,
        Duration::from_secs(config.api.timeout_secs),
        config.elt.retry_policy(),
        Arc::new(CircuitBreaker::default_provider()),
    )?;
    Ok(provider)
}

/// Whole days from the flags; one flag alone selects one day.
fn date_range(pipeline: &Pipeline, start: Option<NaiveDate>, end: Option<NaiveDate>) -> TimeRange {
    match (start, end) {
        (Some(s), Some(e)) => TimeRange::days(s, e),
        (Some(d), None) | (None, Some(d)) => TimeRange::day(d),
        (None, None) => pipeline.incremental_window(Utc::now()),
    }
}

fn run_csv_load(pipeline: &mut Pipeline, dir: &Path, keep: bool) -> Result<Result<RunSummary, JobFailure>> {
    if !dir.is_dir() {
        anyhow::bail!("csv directory does not exist: {}", dir.display());
    }
    let today = pipeline.market().local(Utc::now()).date();
    Ok(pipeline.csv_load(dir, keep, today))
}

fn run_report(pipeline: &mut Pipeline, output: Option<&Path>) -> Result<()> {
    let report = pipeline.weekly_report(Utc::now())?;
    print!("{}", report.render_text());
    if let Some(path) = output {
        report.write_json(path)?;
        println!();
        println!("Report written to: {}", path.display());
    }
    Ok(())
}

fn run_export(pipeline: &mut Pipeline, range: TimeRange, output: &Path) -> Result<()> {
    let export = pipeline.wide_export(range)?;
    export.write_csv(output)?;
    println!(
        "Exported {} rows ({} to {}) to {}",
        export.rows.len(),
        range.start,
        range.end,
        output.display()
    );
    Ok(())
}

fn run_stats(pipeline: &Pipeline, hours: i64) -> Result<()> {
    let stats = pipeline
        .warehouse()
        .load_statistics(hours, Utc::now().naive_utc())?;
    println!("Rows loaded in the last {hours}h");
    println!("{:<20} {:>10} {:>8}  {:<19}  {:<19}", "table", "records", "symbols", "earliest", "latest");
    println!("{}", "-".repeat(82));
    let fmt_ts = |ts: Option<chrono::NaiveDateTime>| ts.map_or_else(|| "-".to_string(), |t| t.to_string());
    for s in &stats {
        println!(
            "{:<20} {:>10} {:>8}  {:<19}  {:<19}",
            s.table,
            s.records,
            s.symbols,
            fmt_ts(s.earliest),
            fmt_ts(s.latest)
        );
    }
    Ok(())
}

fn run_tick(pipeline: &mut Pipeline, tick: Tick, clock: &SystemClock) -> Result<()> {
    let now = clock.now();
    let outcome = match tick {
        Tick::Intraday(_) => pipeline.full(now),
        Tick::EndOfDay(date) => pipeline.end_of_day(date, now),
        Tick::Backfill(date) => pipeline.backfill(date, date),
        Tick::WeeklyReport(_) => {
            let report = pipeline.weekly_report(now)?;
            print!("{}", report.render_text());
            return Ok(());
        }
    };
    let summary = match outcome {
        Ok(summary) => summary,
        Err(failure) => {
            println!("{}", failure.summary.render());
            return Err(failure.error.into());
        }
    };
    println!("{}", summary.render());
    if summary.quality_gate_failed {
        tracing::warn!(tick = tick.label(), failed = summary.checks_failed, "quality gate failed");
    }
    Ok(())
}

fn run_schedule(pipeline: &mut Pipeline, max_ticks: Option<usize>) -> Result<()> {
    let scheduler = Scheduler::from_config(pipeline.config())?;
    let clock = SystemClock;
    let stats = scheduler.run(&clock, |tick| run_tick(pipeline, tick, &clock), max_ticks);
    println!(
        "scheduler stopped: {} ticks run, {} failed, {} skipped",
        stats.ticks_run, stats.failed, stats.skipped
    );
    if stats.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backfill_requires_both_dates() {
        assert!(Cli::try_parse_from(["marketlake", "backfill", "--start-date", "2024-01-02"]).is_err());
        let cli = Cli::try_parse_from([
            "marketlake",
            "backfill",
            "--start-date",
            "2024-01-02",
            "--end-date",
            "2024-01-05",
        ])
        .unwrap();
        match cli.command {
            Commands::Backfill { start_date, end_date } => {
                assert_eq!(start_date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
                assert_eq!(end_date, NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
            }
            _ => panic!("expected backfill"),
        }
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from(["marketlake", "csv-load", "imports", "--keep", "--config", "alt.toml", "--log-json"])
            .unwrap();
        assert_eq!(cli.config, PathBuf::from("alt.toml"));
        assert!(cli.log_json);
        assert!(matches!(cli.command, Commands::CsvLoad { keep: true, .. }));
    }

    #[test]
    fn export_defaults_output_and_takes_a_range() {
        let cli = Cli::try_parse_from(["marketlake", "export", "--start-date", "2024-01-02"]).unwrap();
        match cli.command {
            Commands::Export {
                output,
                start_date,
                end_date,
            } => {
                assert_eq!(output, PathBuf::from("market_data_export.csv"));
                assert_eq!(start_date, NaiveDate::from_ymd_opt(2024, 1, 2));
                assert_eq!(end_date, None);
            }
            _ => panic!("expected export"),
        }
    }

    #[test]
    fn bad_date_is_rejected() {
        assert!(Cli::try_parse_from(["marketlake", "transform", "--start-date", "01/02/2024"]).is_err());
    }

    #[test]
    fn log_json_flag_forces_json() {
        assert!(logging::wants_json(true));
    }
}
