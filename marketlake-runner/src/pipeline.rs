//! Pipeline orchestration: the jobs the CLI and scheduler invoke.
//!
//! Every job runs under its own job log entry, which is always closed:
//! `completed` with its record count, or `failed` with the error. Steps of a
//! composite job (`full`, `backfill`, `end_of_day`) log their own entries
//! beneath it. A job that fails part way hands back a [`JobFailure`] holding
//! the counts of the work it committed before the error.

use crate::config::{ConfigError, PipelineConfig};
use crate::export::WideExport;
use crate::loader::{LoadError, LoadOptions, LoadResult, RawLoader};
use crate::quality::{QualityChecker, QualityReport, QualityScope};
use crate::report::WeeklyReport;
use crate::transform::{TransformError, TransformOptions, TransformResult, Transformer};
use crate::warehouse::{Warehouse, WarehouseError};
use chrono::{DateTime, NaiveDate, Utc};
use marketlake_core::data::csv_import::{self, CsvKind};
use marketlake_core::data::{DataError, DataProvider, ExtractSummary, Extractor, LogProgress, MarketHours};
use marketlake_core::domain::{JobStatus, JobType, QualityStatus, TimeRange};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error("no data provider configured")]
    NoProvider,

    #[error("extraction failed for all {0} symbols")]
    ExtractFailed(usize),
}

/// A job that stopped on `error` after doing the work in `summary`.
#[derive(Debug, Error)]
#[error("{} failed", .summary.job)]
pub struct JobFailure {
    pub summary: RunSummary,
    #[source]
    pub error: PipelineError,
}

/// Add a load's counts to `total`, including the batches committed before a stop.
fn fold_load(total: &mut LoadResult, outcome: Result<LoadResult, LoadError>) -> Result<(), PipelineError> {
    match outcome {
        Ok(result) => {
            total.absorb(&result);
            Ok(())
        }
        Err(e) => {
            if let Some(partial) = e.partial() {
                total.absorb(partial);
            }
            Err(e.into())
        }
    }
}

/// Operator-facing outcome of one invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub job: String,
    pub symbols_extracted: usize,
    pub symbols_failed: usize,
    pub load: LoadResult,
    pub bonds: LoadResult,
    pub csv_files: usize,
    pub csv_rows_unparsed: usize,
    pub transform: Option<TransformResult>,
    pub checks_passed: usize,
    pub checks_warned: usize,
    pub checks_failed: usize,
    /// A FAIL with `quality.fail_on_error` set.
    pub quality_gate_failed: bool,
    pub staging_cleaned: usize,
    pub days: usize,
    /// Set when the job stopped on an error.
    pub error: Option<String>,
}

impl RunSummary {
    fn new(job: JobType) -> Self {
        Self {
            job: job.as_str().to_string(),
            ..Default::default()
        }
    }

    /// Rows written by the job and its steps.
    pub fn records_processed(&self) -> usize {
        self.load.records_processed()
            + self.bonds.records_processed()
            + self.transform.map_or(0, |t| t.records_processed())
    }

    pub fn rows_rejected(&self) -> usize {
        self.load.rows_rejected + self.csv_rows_unparsed
    }

    fn settle(mut self, outcome: Result<(), PipelineError>) -> Result<RunSummary, JobFailure> {
        match outcome {
            Ok(()) => Ok(self),
            Err(error) => {
                self.error = Some(error.to_string());
                Err(JobFailure { summary: self, error })
            }
        }
    }

    /// Fold in a step's outcome, keeping the counts of a failed step.
    fn step(&mut self, outcome: Result<RunSummary, JobFailure>) -> Result<(), PipelineError> {
        match outcome {
            Ok(summary) => {
                self.absorb(&summary);
                Ok(())
            }
            Err(failure) => {
                self.absorb(&failure.summary);
                Err(failure.error)
            }
        }
    }

    fn absorb(&mut self, other: &RunSummary) {
        self.symbols_extracted += other.symbols_extracted;
        self.symbols_failed += other.symbols_failed;
        self.load.absorb(&other.load);
        self.bonds.absorb(&other.bonds);
        self.csv_files += other.csv_files;
        self.csv_rows_unparsed += other.csv_rows_unparsed;
        if let Some(t) = other.transform {
            self.transform.get_or_insert_with(TransformResult::default).absorb(&t);
        }
        self.checks_passed += other.checks_passed;
        self.checks_warned += other.checks_warned;
        self.checks_failed += other.checks_failed;
        self.quality_gate_failed |= other.quality_gate_failed;
        self.staging_cleaned += other.staging_cleaned;
        self.days += other.days;
    }

    fn add_quality(&mut self, report: &QualityReport, fail_on_error: bool) {
        self.checks_passed += report.count(QualityStatus::Pass);
        self.checks_warned += report.count(QualityStatus::Warn);
        self.checks_failed += report.count(QualityStatus::Fail);
        self.quality_gate_failed |= fail_on_error && report.has_failures();
    }

    /// Lines printed at the end of every invocation.
    pub fn render(&self) -> String {
        let mut lines = vec![match &self.error {
            Some(e) => format!("{} failed: {e}", self.job),
            None => format!("{} finished", self.job),
        }];
        if self.symbols_extracted + self.symbols_failed > 0 {
            lines.push(format!(
                "  extract:   {} symbols ok, {} failed",
                self.symbols_extracted, self.symbols_failed
            ));
        }
        if self.csv_files > 0 {
            lines.push(format!(
                "  csv:       {} files, {} unparsable rows",
                self.csv_files, self.csv_rows_unparsed
            ));
        }
        let l = &self.load;
        lines.push(format!(
            "  load:      {} inserted, {} updated, {} rejected, {} deduplicated",
            l.rows_inserted, l.rows_updated, l.rows_rejected, l.rows_deduplicated
        ));
        if self.bonds.records_processed() > 0 {
            lines.push(format!(
                "  bonds:     {} inserted, {} updated",
                self.bonds.rows_inserted, self.bonds.rows_updated
            ));
        }
        if let Some(t) = &self.transform {
            lines.push(format!(
                "  transform: {} symbols ({} failed), {} indicator rows, {} daily rows, {} summaries",
                t.symbols_processed, t.symbols_failed, t.indicators_written, t.aggregates_written, t.summaries_written
            ));
        }
        let checks = self.checks_passed + self.checks_warned + self.checks_failed;
        if checks > 0 {
            lines.push(format!(
                "  quality:   {} passed, {} warned, {} failed{}",
                self.checks_passed,
                self.checks_warned,
                self.checks_failed,
                if self.quality_gate_failed { " (gate failed)" } else { "" }
            ));
        }
        if self.staging_cleaned > 0 {
            lines.push(format!("  cleanup:   {} stale staging rows removed", self.staging_cleaned));
        }
        lines.push(format!(
            "  total:     {} rows processed, {} rejected",
            self.records_processed(),
            self.rows_rejected()
        ));
        lines.join("\n")
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    warehouse: Warehouse,
    provider: Option<Box<dyn DataProvider>>,
    market: MarketHours,
    config_hash: String,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, warehouse: Warehouse) -> Result<Self, PipelineError> {
        config.validate()?;
        let market = config.market_hours()?;
        let config_hash = config.config_hash();
        Ok(Self {
            config,
            warehouse,
            provider: None,
            market,
            config_hash,
        })
    }

    pub fn with_provider(mut self, provider: Box<dyn DataProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }

    pub fn market(&self) -> &MarketHours {
        &self.market
    }

    /// Trailing `elt.incremental_hours` ending at the exchange-local `now`.
    pub fn incremental_window(&self, now: DateTime<Utc>) -> TimeRange {
        TimeRange::trailing(self.market.local(now), self.config.elt.incremental_hours)
    }

    fn run_job<T>(
        &mut self,
        job_type: JobType,
        context: Value,
        records: impl Fn(&T) -> usize,
        f: impl FnOnce(&mut Self) -> Result<T, PipelineError>,
    ) -> Result<T, PipelineError> {
        let mut metadata = context;
        metadata["config_hash"] = json!(self.config_hash);
        let job_id = self.warehouse.start_job(job_type, Utc::now().naive_utc(), &metadata)?;
        let outcome = f(self);
        let (n, error) = match &outcome {
            Ok(value) => (records(value), None),
            Err(e) => (0, Some(e)),
        };
        self.close_job(job_id, job_type, &metadata, n, error)?;
        outcome
    }

    /// `run_job` for jobs reporting a [`RunSummary`]. `f` fills the summary in
    /// as it goes; on failure the job entry keeps the rows written so far.
    fn run_summary_job(
        &mut self,
        job_type: JobType,
        context: Value,
        f: impl FnOnce(&mut Self, &mut RunSummary) -> Result<(), PipelineError>,
    ) -> Result<RunSummary, JobFailure> {
        let mut run = RunSummary::new(job_type);
        let mut metadata = context;
        metadata["config_hash"] = json!(self.config_hash);
        let job_id = match self.warehouse.start_job(job_type, Utc::now().naive_utc(), &metadata) {
            Ok(id) => id,
            Err(e) => return run.settle(Err(e.into())),
        };
        let outcome = f(self, &mut run);
        let closed = self.close_job(job_id, job_type, &metadata, run.records_processed(), outcome.as_ref().err());
        run.settle(outcome.and(closed.map_err(PipelineError::from)))
    }

    fn close_job(
        &mut self,
        job_id: i64,
        job_type: JobType,
        metadata: &Value,
        records: usize,
        error: Option<&PipelineError>,
    ) -> Result<(), WarehouseError> {
        let end = Utc::now().naive_utc();
        match error {
            None => self
                .warehouse
                .finish_job(job_id, end, JobStatus::Completed, records as u64, None, metadata)?,
            Some(e) => {
                tracing::error!(job_id, job_type = %job_type, error = %e, "job failed");
                self.warehouse.finish_job(
                    job_id,
                    end,
                    JobStatus::Failed,
                    records as u64,
                    Some(&e.to_string()),
                    metadata,
                )?
            }
        };
        Ok(())
    }

    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            batch_size: self.config.elt.batch_size,
            interval_minutes: self.config.elt.bar_interval_minutes,
            retry: self.config.elt.retry_policy(),
            config_hash: self.config_hash.clone(),
        }
    }

    fn transform_options(&self) -> TransformOptions {
        TransformOptions {
            lookback_periods: self.config.elt.lookback_periods,
            base_interval_minutes: self.config.elt.bar_interval_minutes,
            top_n: self.config.transform.top_n,
            config_hash: self.config_hash.clone(),
        }
    }

    /// Extract `window` from the provider and load it.
    pub fn extract_load(&mut self, window: TimeRange) -> Result<RunSummary, JobFailure> {
        let mut run = RunSummary::new(JobType::Extract);
        let outcome = self.extract_into(window, &mut run);
        run.settle(outcome)
    }

    fn extract_into(&mut self, window: TimeRange, run: &mut RunSummary) -> Result<(), PipelineError> {
        let context = json!({ "window": { "start": window.start, "end": window.end } });
        let records = |s: &ExtractSummary| s.bars.len() + s.treasury.len();
        let extracted = self.run_job(JobType::Extract, context, records, |p| {
            let provider = p.provider.as_deref().ok_or(PipelineError::NoProvider)?;
            let summary = Extractor::new(provider, p.config.extract_options()).extract(
                &p.config.registry,
                window,
                &LogProgress,
            );
            if summary.total > 0 && summary.succeeded == 0 {
                return Err(PipelineError::ExtractFailed(summary.total));
            }
            Ok(summary)
        });
        let extracted = match extracted {
            Ok(summary) => summary,
            Err(e) => {
                if let PipelineError::ExtractFailed(total) = e {
                    run.symbols_failed = total;
                }
                return Err(e);
            }
        };
        for (symbol, e) in &extracted.errors {
            tracing::warn!(symbol = %symbol, error = %e, "symbol skipped");
        }

        run.symbols_extracted = extracted.succeeded;
        run.symbols_failed = extracted.failed;
        let options = self.load_options();
        let mut loader = RawLoader::new(&mut self.warehouse, options);
        fold_load(&mut run.load, loader.load(&extracted.bars, "fmp"))?;
        if !extracted.treasury.is_empty() {
            fold_load(&mut run.bonds, loader.load_rates(&extracted.treasury, "fmp"))?;
        }
        Ok(())
    }

    /// Load every CSV under `dir`, archiving each loaded file unless `keep`.
    /// A file that fails stops the job; files before it stay loaded.
    pub fn csv_load(&mut self, dir: &Path, keep: bool, today: NaiveDate) -> Result<RunSummary, JobFailure> {
        let files = match csv_import::discover(dir) {
            Ok(files) => files,
            Err(e) => return RunSummary::new(JobType::CsvLoad).settle(Err(e.into())),
        };
        let context = json!({ "dir": dir.display().to_string(), "files": files.len() });
        self.run_summary_job(JobType::CsvLoad, context, |p, run| {
            let options = p.load_options();
            for file in &files {
                let source = file.path.display().to_string();
                let mut loader = RawLoader::new(&mut p.warehouse, options.clone());
                match file.kind {
                    CsvKind::Ohlcv(kind) => {
                        let parsed = csv_import::read_bars(&file.path, kind)?;
                        run.csv_rows_unparsed += parsed.rejected.len();
                        let context = json!({ "source": source, "unparsed_rows": parsed.rejected.len() });
                        fold_load(&mut run.load, loader.load_as(JobType::Load, &parsed.bars, context))?;
                    }
                    CsvKind::Bonds => {
                        let parsed = csv_import::read_rates(&file.path)?;
                        run.csv_rows_unparsed += parsed.rejected.len();
                        fold_load(&mut run.bonds, loader.load_rates(&parsed.rates, &source))?;
                    }
                }
                run.csv_files += 1;
                tracing::info!(file = %source, "csv loaded");
                if !keep {
                    csv_import::archive(&file.path, dir, today)?;
                }
            }
            Ok(())
        })
    }

    pub fn transform(&mut self, range: TimeRange) -> Result<RunSummary, JobFailure> {
        let options = self.transform_options();
        let mut run = RunSummary::new(JobType::Transform);
        let outcome = Transformer::new(&mut self.warehouse, options)
            .run(range)
            .map(|result| run.transform = Some(result))
            .map_err(PipelineError::from);
        run.settle(outcome)
    }

    /// Run and record the quality checks. The returned summary carries the
    /// gate verdict; the job itself completes either way.
    pub fn quality(&mut self, window: TimeRange, now: DateTime<Utc>) -> Result<(RunSummary, QualityReport), PipelineError> {
        let context = json!({ "window": { "start": window.start, "end": window.end } });
        let fail_on_error = self.config.quality.fail_on_error;
        let report = self.run_job(JobType::Quality, context, |r: &QualityReport| r.results.len(), |p| {
            let report = QualityChecker::new(&p.warehouse, &p.config.quality, &p.config.registry, p.market)
                .run_checks(QualityScope { window, now })?;
            p.warehouse.insert_quality_results(&report.results)?;
            Ok(report)
        })?;
        let mut run = RunSummary::new(JobType::Quality);
        run.add_quality(&report, fail_on_error);
        if run.quality_gate_failed {
            tracing::error!(failed = run.checks_failed, "quality gate failed");
        }
        Ok((run, report))
    }

    pub fn cleanup(&mut self, now: DateTime<Utc>) -> Result<RunSummary, PipelineError> {
        let max_age = self.config.elt.staging_max_age_days;
        let context = json!({ "max_age_days": max_age });
        let removed = self.run_job(JobType::Cleanup, context, |n: &usize| *n, |p| {
            Ok(p.warehouse.cleanup_staging(max_age, now.naive_utc())?)
        })?;
        if removed > 0 {
            tracing::info!(rows = removed, "stale staging rows removed");
        }
        Ok(RunSummary {
            staging_cleaned: removed,
            ..RunSummary::new(JobType::Cleanup)
        })
    }

    /// Incremental extract, load, transform and quality; cleanup unless the
    /// quality gate failed.
    pub fn full(&mut self, now: DateTime<Utc>) -> Result<RunSummary, JobFailure> {
        let window = self.incremental_window(now);
        let context = json!({ "window": { "start": window.start, "end": window.end } });
        self.run_summary_job(JobType::Full, context, |p, run| {
            run.step(p.extract_load(window))?;
            run.step(p.transform(window))?;
            let (quality, _) = p.quality(window, now)?;
            run.absorb(&quality);
            if run.quality_gate_failed {
                tracing::warn!("skipping staging cleanup after failed quality gate");
            } else {
                run.absorb(&p.cleanup(now)?);
            }
            Ok(())
        })
    }

    /// Extract, load and transform each trading day in `[start, end]`.
    pub fn backfill(&mut self, start: NaiveDate, end: NaiveDate) -> Result<RunSummary, JobFailure> {
        let days = MarketHours::trading_days(start, end);
        let context = json!({ "start": start, "end": end, "trading_days": days.len() });
        self.run_summary_job(JobType::Backfill, context, |p, run| {
            for day in &days {
                let window = TimeRange::day(*day);
                tracing::info!(date = %day, "backfilling");
                run.step(p.extract_load(window))?;
                run.step(p.transform(window))?;
                run.days += 1;
            }
            Ok(())
        })
    }

    /// Daily transform over `date`, quality over the day, staging cleanup.
    pub fn end_of_day(&mut self, date: NaiveDate, now: DateTime<Utc>) -> Result<RunSummary, JobFailure> {
        let window = TimeRange::day(date);
        let context = json!({ "date": date });
        self.run_summary_job(JobType::EndOfDay, context, |p, run| {
            run.days = 1;
            run.step(p.transform(window))?;
            let (quality, _) = p.quality(window, now)?;
            run.absorb(&quality);
            if !run.quality_gate_failed {
                run.absorb(&p.cleanup(now)?);
            }
            Ok(())
        })
    }

    /// Wide export of the registry's stock bars in `range`.
    pub fn wide_export(&mut self, range: TimeRange) -> Result<WideExport, PipelineError> {
        let context = json!({ "range": { "start": range.start, "end": range.end } });
        self.run_job(JobType::Export, context, |e: &WideExport| e.rows.len(), |p| {
            Ok(WideExport::build(&p.warehouse, &p.config.registry, range)?)
        })
    }

    pub fn weekly_report(&mut self, now: DateTime<Utc>) -> Result<WeeklyReport, PipelineError> {
        let today = self.market.local(now).date();
        let top_n = self.config.transform.top_n;
        self.run_job(JobType::Report, json!({ "date": today }), |r: &WeeklyReport| r.tables.len(), |p| {
            Ok(WeeklyReport::build(&p.warehouse, now.naive_utc(), today, top_n)?)
        })
    }
}
