//! Raw loader: validate, stage and merge bars into the raw tables.
//!
//! A load call is one job log entry. Input is deduplicated by
//! (table_type, symbol, timestamp), keeping the last occurrence, then split
//! into batches of `batch_size`. Every batch is one warehouse transaction:
//! staging insert, merge, staging delete and rejection rows. A batch that
//! keeps failing after its retries stops the load; committed batches stay.

use crate::config::PipelineConfig;
use crate::warehouse::{LoadRejection, MergeCounts, Warehouse, WarehouseError};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use marketlake_core::data::{RetryError, RetryPolicy};
use marketlake_core::domain::{Bar, BarRejection, JobStatus, JobType, TreasuryRate};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadResult {
    pub rows_inserted: usize,
    pub rows_updated: usize,
    pub rows_rejected: usize,
    pub rows_deduplicated: usize,
}

impl LoadResult {
    /// Rows written to raw tables.
    pub fn records_processed(&self) -> usize {
        self.rows_inserted + self.rows_updated
    }

    pub fn absorb(&mut self, other: &LoadResult) {
        self.rows_inserted += other.rows_inserted;
        self.rows_updated += other.rows_updated;
        self.rows_rejected += other.rows_rejected;
        self.rows_deduplicated += other.rows_deduplicated;
    }

    fn add_merge(&mut self, counts: MergeCounts) {
        self.rows_inserted += counts.inserted;
        self.rows_updated += counts.updated;
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    /// The job log itself could not be written.
    #[error("warehouse: {0}")]
    Warehouse(#[from] WarehouseError),

    /// A batch failed; `partial` holds the batches committed before it.
    #[error("load stopped at batch {batch}: {source}")]
    Stopped {
        batch: usize,
        partial: LoadResult,
        #[source]
        source: WarehouseError,
    },
}

impl LoadError {
    pub fn partial(&self) -> Option<&LoadResult> {
        match self {
            Self::Stopped { partial, .. } => Some(partial),
            Self::Warehouse(_) => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Warehouse(e) | Self::Stopped { source: e, .. } => e.is_fatal(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub batch_size: usize,
    pub interval_minutes: u32,
    pub retry: RetryPolicy,
    /// Recorded in job metadata.
    pub config_hash: String,
}

impl LoadOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            batch_size: config.elt.batch_size,
            interval_minutes: config.elt.bar_interval_minutes,
            retry: config.elt.retry_policy(),
            config_hash: config.config_hash(),
        }
    }
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            interval_minutes: 15,
            retry: RetryPolicy::default(),
            config_hash: String::new(),
        }
    }
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

fn rejection_reason(r: &BarRejection) -> &'static str {
    match r {
        BarRejection::InvalidSymbol { .. } => "invalid_symbol",
        BarRejection::NonFinite { .. } => "non_finite",
        BarRejection::NonPositivePrice { .. } => "non_positive_price",
        BarRejection::HighBelow { .. } => "high_below",
        BarRejection::LowAbove { .. } => "low_above",
        BarRejection::NegativeVolume { .. } => "negative_volume",
        BarRejection::Misaligned { .. } => "misaligned",
    }
}

/// Keep the last occurrence of each key, in order of those occurrences.
fn dedup_last<T, K: std::hash::Hash + Eq>(items: &[T], key: impl Fn(&T) -> K) -> (Vec<&T>, usize) {
    let mut last: HashMap<K, usize> = HashMap::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        last.insert(key(item), i);
    }
    let kept: Vec<&T> = items
        .iter()
        .enumerate()
        .filter(|(i, item)| last.get(&key(item)) == Some(i))
        .map(|(_, item)| item)
        .collect();
    let dropped = items.len() - kept.len();
    (kept, dropped)
}

pub struct RawLoader<'a> {
    warehouse: &'a mut Warehouse,
    options: LoadOptions,
}

impl<'a> RawLoader<'a> {
    pub fn new(warehouse: &'a mut Warehouse, options: LoadOptions) -> Self {
        Self { warehouse, options }
    }

    /// Load bars under a `load` job entry.
    pub fn load(&mut self, bars: &[Bar], source: &str) -> Result<LoadResult, LoadError> {
        self.load_as(JobType::Load, bars, json!({ "source": source }))
    }

    /// Load bars under a job entry of `job_type`; `context` is merged into
    /// the entry's metadata.
    pub fn load_as(
        &mut self,
        job_type: JobType,
        bars: &[Bar],
        context: serde_json::Value,
    ) -> Result<LoadResult, LoadError> {
        let mut metadata = context;
        metadata["config_hash"] = json!(self.options.config_hash);
        metadata["input_rows"] = json!(bars.len());
        let job_id = self.warehouse.start_job(job_type, now(), &metadata)?;

        let (unique, deduplicated) =
            dedup_last(bars, |b| (b.instrument_type, b.symbol.clone(), b.timestamp));
        let mut result = LoadResult {
            rows_deduplicated: deduplicated,
            ..Default::default()
        };
        if deduplicated > 0 {
            tracing::debug!(job_id, rows = deduplicated, "collapsed duplicate keys");
        }

        let mut batches = Vec::new();
        for (n, chunk) in unique.chunks(self.options.batch_size.max(1)).enumerate() {
            let (valid, rejections) = self.validate(chunk);
            let batch_id = format!("{job_id}-{n}");
            match self.merge_with_retry(&batch_id, &valid, &rejections) {
                Ok(counts) => {
                    result.add_merge(counts);
                    result.rows_rejected += rejections.len();
                    batches.push(json!({
                        "batch": n,
                        "inserted": counts.inserted,
                        "updated": counts.updated,
                        "rejected": rejections.len(),
                    }));
                }
                Err(source) => {
                    tracing::error!(job_id, batch = n, error = %source, "batch failed, stopping load");
                    metadata["batches"] = json!(batches);
                    metadata["result"] = json!(result);
                    let message = format!("batch {n}: {source}");
                    self.warehouse.finish_job(
                        job_id,
                        now(),
                        JobStatus::Failed,
                        result.records_processed() as u64,
                        Some(&message),
                        &metadata,
                    )?;
                    return Err(LoadError::Stopped {
                        batch: n,
                        partial: result,
                        source,
                    });
                }
            }
        }

        metadata["batches"] = json!(batches);
        metadata["result"] = json!(result);
        self.warehouse.finish_job(
            job_id,
            now(),
            JobStatus::Completed,
            result.records_processed() as u64,
            None,
            &metadata,
        )?;
        tracing::info!(
            job_id,
            inserted = result.rows_inserted,
            updated = result.rows_updated,
            rejected = result.rows_rejected,
            deduplicated = result.rows_deduplicated,
            "load complete"
        );
        Ok(result)
    }

    fn validate(&self, chunk: &[&Bar]) -> (Vec<Bar>, Vec<LoadRejection>) {
        let mut valid = Vec::with_capacity(chunk.len());
        let mut rejections = Vec::new();
        for bar in chunk {
            match bar.validate(self.options.interval_minutes) {
                Ok(()) => valid.push((*bar).clone()),
                Err(rejection) => {
                    tracing::debug!(symbol = %bar.symbol, timestamp = %bar.timestamp, %rejection, "bar rejected");
                    rejections.push(LoadRejection {
                        symbol: bar.symbol.clone(),
                        table_type: bar.instrument_type,
                        timestamp: Some(bar.timestamp),
                        reason: rejection_reason(&rejection).to_string(),
                        detail: serde_json::to_value(&rejection).unwrap_or(serde_json::Value::Null),
                    });
                }
            }
        }
        (valid, rejections)
    }

    fn merge_with_retry(
        &mut self,
        batch_id: &str,
        bars: &[Bar],
        rejections: &[LoadRejection],
    ) -> Result<MergeCounts, WarehouseError> {
        let warehouse = &mut *self.warehouse;
        self.options
            .retry
            .run(
                |attempt| {
                    if attempt > 1 {
                        tracing::warn!(batch_id, attempt, "retrying batch merge");
                    }
                    warehouse.merge_batch(batch_id, bars, rejections)
                },
                WarehouseError::is_transient,
            )
            .map_err(RetryError::into_inner)
    }

    /// Upsert treasury curves by date under a `load_bonds` job entry.
    pub fn load_rates(&mut self, rates: &[TreasuryRate], source: &str) -> Result<LoadResult, LoadError> {
        let mut metadata = json!({
            "source": source,
            "config_hash": self.options.config_hash,
            "input_rows": rates.len(),
        });
        let job_id = self.warehouse.start_job(JobType::LoadBonds, now(), &metadata)?;
        let (unique, deduplicated) = dedup_last(rates, |r: &TreasuryRate| -> NaiveDate { r.date });
        let mut result = LoadResult {
            rows_deduplicated: deduplicated,
            ..Default::default()
        };

        for (n, chunk) in unique.chunks(self.options.batch_size.max(1)).enumerate() {
            let chunk: Vec<TreasuryRate> = chunk.iter().map(|r| (*r).clone()).collect();
            let warehouse = &mut *self.warehouse;
            let merged = self
                .options
                .retry
                .run(|_| warehouse.upsert_rates(&chunk), WarehouseError::is_transient)
                .map_err(RetryError::into_inner);
            match merged {
                Ok(counts) => result.add_merge(counts),
                Err(source) => {
                    tracing::error!(job_id, batch = n, error = %source, "bond batch failed, stopping load");
                    metadata["result"] = json!(result);
                    let message = format!("batch {n}: {source}");
                    self.warehouse.finish_job(
                        job_id,
                        now(),
                        JobStatus::Failed,
                        result.records_processed() as u64,
                        Some(&message),
                        &metadata,
                    )?;
                    return Err(LoadError::Stopped {
                        batch: n,
                        partial: result,
                        source,
                    });
                }
            }
        }

        metadata["result"] = json!(result);
        self.warehouse.finish_job(
            job_id,
            now(),
            JobStatus::Completed,
            result.records_processed() as u64,
            None,
            &metadata,
        )?;
        tracing::info!(job_id, inserted = result.rows_inserted, updated = result.rows_updated, "bond load complete");
        Ok(result)
    }
}
