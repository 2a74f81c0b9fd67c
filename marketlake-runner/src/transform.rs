//! Analytics transformer.
//!
//! Per symbol: read the raw bars of the days touched by the range plus a
//! lookback window before them, compute indicators over the whole series,
//! and upsert indicator, enriched and daily rows for the range only. Then
//! per market and date, a summary from the day's aggregates, and bond
//! curve analytics. Everything written is keyed, so re-running a range
//! over unchanged raw data rewrites identical rows.

use crate::config::PipelineConfig;
use crate::warehouse::{Warehouse, WarehouseError};
use chrono::{NaiveDateTime, Utc};
use marketlake_core::analytics::{enrich, market_summary};
use marketlake_core::data::{resample, roll_up_daily};
use marketlake_core::domain::{BondAnalytics, InstrumentType, JobStatus, JobType, TimeRange};
use marketlake_core::indicators::{indicator_records, standard_indicators, Indicator};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransformResult {
    pub indicators_written: usize,
    pub aggregates_written: usize,
    pub analytics_written: usize,
    pub summaries_written: usize,
    pub bonds_written: usize,
    pub symbols_processed: usize,
    pub symbols_failed: usize,
}

impl TransformResult {
    pub fn absorb(&mut self, other: &TransformResult) {
        self.indicators_written += other.indicators_written;
        self.aggregates_written += other.aggregates_written;
        self.analytics_written += other.analytics_written;
        self.summaries_written += other.summaries_written;
        self.bonds_written += other.bonds_written;
        self.symbols_processed += other.symbols_processed;
        self.symbols_failed += other.symbols_failed;
    }

    pub fn records_processed(&self) -> usize {
        self.indicators_written + self.aggregates_written + self.analytics_written
    }
}

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("warehouse: {0}")]
    Warehouse(#[from] WarehouseError),

    #[error("transform {symbol}: {source}")]
    Symbol {
        symbol: String,
        #[source]
        source: WarehouseError,
    },
}

impl TransformError {
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Warehouse(e) | Self::Symbol { source: e, .. } => e.is_fatal(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransformOptions {
    pub lookback_periods: usize,
    pub base_interval_minutes: u32,
    pub top_n: usize,
    pub config_hash: String,
}

impl TransformOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            lookback_periods: config.elt.lookback_periods,
            base_interval_minutes: config.elt.bar_interval_minutes,
            top_n: config.transform.top_n,
            config_hash: config.config_hash(),
        }
    }
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            lookback_periods: 200,
            base_interval_minutes: 15,
            top_n: 5,
            config_hash: String::new(),
        }
    }
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

pub struct Transformer<'a> {
    warehouse: &'a mut Warehouse,
    options: TransformOptions,
    indicators: Vec<Box<dyn Indicator>>,
}

impl<'a> Transformer<'a> {
    pub fn new(warehouse: &'a mut Warehouse, options: TransformOptions) -> Self {
        Self {
            warehouse,
            options,
            indicators: standard_indicators(),
        }
    }

    /// Indicators, enriched rows and daily aggregates for one symbol.
    pub fn transform_symbol(
        &mut self,
        symbol: &str,
        kind: InstrumentType,
        range: TimeRange,
    ) -> Result<TransformResult, WarehouseError> {
        let days = TimeRange::days(range.start.date(), range.end.date());
        let mut bars = self
            .warehouse
            .bars_with_lookback(kind, symbol, days, self.options.lookback_periods)?;
        if kind == InstrumentType::Index {
            bars = resample(&bars, self.options.base_interval_minutes);
        }
        if bars.is_empty() {
            return Ok(TransformResult::default());
        }

        let records = indicator_records(&bars, range, &self.indicators);
        let analytics = enrich(&bars, range);
        let in_days: Vec<_> = bars
            .iter()
            .filter(|b| days.contains(b.timestamp))
            .cloned()
            .collect();
        let daily = roll_up_daily(&in_days);

        let result = TransformResult {
            indicators_written: self.warehouse.upsert_indicators(&records)?,
            analytics_written: self.warehouse.upsert_analytics_bars(&analytics)?,
            aggregates_written: self.warehouse.upsert_daily_aggregates(&daily)?,
            symbols_processed: 1,
            ..Default::default()
        };
        tracing::debug!(
            symbol,
            table_type = %kind,
            bars = bars.len(),
            indicators = result.indicators_written,
            aggregates = result.aggregates_written,
            "symbol transformed"
        );
        Ok(result)
    }

    /// Market summaries for every date in `range` with aggregates.
    pub fn summarize(&mut self, range: TimeRange) -> Result<usize, WarehouseError> {
        let mut written = 0;
        for kind in InstrumentType::ALL {
            for date in range.dates() {
                let days = self.warehouse.daily_aggregates(kind, date)?;
                if days.is_empty() {
                    continue;
                }
                let previous = self.warehouse.previous_closes(kind, date)?;
                if let Some(summary) = market_summary(date, kind, &days, &previous, self.options.top_n) {
                    self.warehouse.upsert_market_summary(&summary)?;
                    written += 1;
                }
            }
        }
        Ok(written)
    }

    pub fn transform_bonds(&mut self, range: TimeRange) -> Result<usize, WarehouseError> {
        let rows: Vec<BondAnalytics> = self
            .warehouse
            .rates_between(range)?
            .iter()
            .map(BondAnalytics::from_rate)
            .collect();
        self.warehouse.upsert_bond_analytics(&rows)
    }

    /// Transform every symbol with raw bars in `range`, under one
    /// `transform` job entry. A failing symbol is logged and skipped unless
    /// its error is fatal.
    pub fn run(&mut self, range: TimeRange) -> Result<TransformResult, TransformError> {
        let mut metadata = json!({
            "range": { "start": range.start, "end": range.end },
            "config_hash": self.options.config_hash,
        });
        let job_id = self.warehouse.start_job(JobType::Transform, now(), &metadata)?;
        match self.run_inner(range, &mut metadata) {
            Ok(result) => {
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
                    symbols = result.symbols_processed,
                    failed = result.symbols_failed,
                    indicators = result.indicators_written,
                    aggregates = result.aggregates_written,
                    summaries = result.summaries_written,
                    "transform complete"
                );
                Ok(result)
            }
            Err(e) => {
                tracing::error!(job_id, error = %e, "transform failed");
                self.warehouse.finish_job(
                    job_id,
                    now(),
                    JobStatus::Failed,
                    0,
                    Some(&e.to_string()),
                    &metadata,
                )?;
                Err(e)
            }
        }
    }

    fn run_inner(
        &mut self,
        range: TimeRange,
        metadata: &mut serde_json::Value,
    ) -> Result<TransformResult, TransformError> {
        let mut total = TransformResult::default();
        let mut failures = Vec::new();
        for kind in InstrumentType::ALL {
            for symbol in self.warehouse.symbols_in_range(kind, range)? {
                match self.transform_symbol(&symbol, kind, range) {
                    Ok(r) => total.absorb(&r),
                    Err(e) if e.is_fatal() => {
                        return Err(TransformError::Symbol { symbol, source: e });
                    }
                    Err(e) => {
                        tracing::warn!(symbol = %symbol, table_type = %kind, error = %e, "symbol transform failed, skipping");
                        total.symbols_failed += 1;
                        failures.push(json!({ "symbol": symbol, "error": e.to_string() }));
                    }
                }
            }
        }
        metadata["failures"] = json!(failures);
        total.summaries_written = self.summarize(range)?;
        total.bonds_written = self.transform_bonds(range)?;
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{LoadOptions, RawLoader};
    use crate::warehouse::test_support::{series, ts};
    use chrono::Duration;
    use marketlake_core::domain::{Bar, TreasuryRate};

    fn load(wh: &mut Warehouse, bars: &[Bar]) {
        RawLoader::new(wh, LoadOptions::default()).load(bars, "test").unwrap();
    }

    #[test]
    fn short_history_withholds_sma_200() {
        let mut wh = Warehouse::open_in_memory().unwrap();
        let bars = series("AAPL", ts(2, 9, 30), 120);
        load(&mut wh, &bars);
        let last = bars[119].timestamp;
        let range = TimeRange::new(last, last);

        let result = Transformer::new(&mut wh, TransformOptions::default())
            .transform_symbol("AAPL", InstrumentType::Stock, range)
            .unwrap();
        assert_eq!(result.indicators_written, 1);
        let rows = wh.indicators(InstrumentType::Stock, "AAPL", range).unwrap();
        assert_eq!(rows[0].values.sma_200, None);
        assert!(rows[0].values.sma_20.is_some());
        assert!(rows[0].values.sma_50.is_some());
    }

    #[test]
    fn rerun_is_idempotent() {
        let mut wh = Warehouse::open_in_memory().unwrap();
        let bars = series("AAPL", ts(2, 9, 30), 260);
        load(&mut wh, &bars);
        let range = TimeRange::new(bars[250].timestamp, bars[259].timestamp);

        Transformer::new(&mut wh, TransformOptions::default()).run(range).unwrap();
        let first = wh.indicators(InstrumentType::Stock, "AAPL", range).unwrap();
        Transformer::new(&mut wh, TransformOptions::default()).run(range).unwrap();
        let second = wh.indicators(InstrumentType::Stock, "AAPL", range).unwrap();
        assert_eq!(first.len(), 10);
        assert_eq!(first, second);
        assert!(first.iter().all(|r| r.values.sma_200.is_some()));
    }

    #[test]
    fn run_writes_summaries_and_bonds() {
        let mut wh = Warehouse::open_in_memory().unwrap();
        let mut bars = series("AAPL", ts(2, 9, 30), 26);
        bars.extend(series("MSFT", ts(2, 9, 30), 26));
        load(&mut wh, &bars);
        wh.upsert_rates(&[TreasuryRate {
            date: ts(2, 0, 0).date(),
            year2: Some(4.3),
            year10: Some(3.9),
            ..Default::default()
        }])
        .unwrap();

        let range = TimeRange::day(ts(2, 0, 0).date());
        let result = Transformer::new(&mut wh, TransformOptions::default()).run(range).unwrap();
        assert_eq!(result.symbols_processed, 2);
        assert_eq!(result.aggregates_written, 2);
        assert_eq!(result.analytics_written, 52);
        assert_eq!(result.summaries_written, 1);
        assert_eq!(result.bonds_written, 1);

        let summary = wh
            .market_summary(range.start.date(), InstrumentType::Stock)
            .unwrap()
            .unwrap();
        assert_eq!(summary.total_symbols, 2);
        assert_eq!(summary.advancing, 2);
        assert_eq!(wh.bond_analytics(range.start.date()).unwrap().unwrap().inverted, Some(true));

        let job = wh.jobs_since(ts(1, 0, 0)).unwrap().pop().unwrap();
        assert_eq!(job.job_type, "transform");
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn daily_aggregate_covers_whole_day_for_partial_range() {
        let mut wh = Warehouse::open_in_memory().unwrap();
        let bars = series("AAPL", ts(2, 9, 30), 26);
        load(&mut wh, &bars);
        let end = bars[25].timestamp;
        let range = TimeRange::new(end - Duration::hours(2), end);

        Transformer::new(&mut wh, TransformOptions::default()).run(range).unwrap();
        let daily = wh.daily_aggregates(InstrumentType::Stock, range.start.date()).unwrap();
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].bar_count, 26);
        assert_eq!(daily[0].open, bars[0].open);
    }
}
