//! Extraction orchestrator: walks the registry in rate-limited batches.

use super::provider::{DataError, DataProvider, ExtractProgress};
use super::registry::{validate_symbol, Registry};
use super::resample::resample;
use crate::domain::{Bar, InstrumentType, TimeRange, TreasuryRate};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractOptions {
    /// Pipeline bar interval in minutes.
    pub base_interval_minutes: u32,
    /// Interval indexes are fetched at before resampling.
    pub index_native_interval_minutes: u32,
    pub call_delay: Duration,
    pub batch_delay: Duration,
    pub symbol_batch_size: usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            base_interval_minutes: 15,
            index_native_interval_minutes: 5,
            call_delay: Duration::from_millis(100),
            batch_delay: Duration::from_secs(1),
            symbol_batch_size: 10,
        }
    }
}

#[derive(Debug, Default)]
pub struct ExtractSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<(String, DataError)>,
    /// Bars as delivered (resampled where needed), not yet validated.
    pub bars: Vec<Bar>,
    pub treasury: Vec<TreasuryRate>,
}

impl ExtractSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

pub struct Extractor<'a> {
    provider: &'a dyn DataProvider,
    options: ExtractOptions,
}

impl<'a> Extractor<'a> {
    pub fn new(provider: &'a dyn DataProvider, options: ExtractOptions) -> Self {
        Self { provider, options }
    }

    /// Fetch every registry symbol over `window`. Per-symbol failures are
    /// recorded and skipped; an open circuit breaker fails the remainder.
    pub fn extract(&self, registry: &Registry, window: TimeRange, progress: &dyn ExtractProgress) -> ExtractSummary {
        let symbols = registry.all();
        let total = symbols.len();
        let mut summary = ExtractSummary {
            total,
            ..Default::default()
        };

        let batch_size = self.options.symbol_batch_size.max(1);
        let mut index = 0;
        'batches: for (batch_no, batch) in symbols.chunks(batch_size).enumerate() {
            if batch_no > 0 {
                pause(self.options.batch_delay);
            }
            for (pos, &(kind, symbol)) in batch.iter().enumerate() {
                if pos > 0 {
                    pause(self.options.call_delay);
                }
                progress.on_start(symbol, index, total);
                let result = self.extract_symbol(symbol, kind, window);
                progress.on_complete(symbol, index, total, result.as_ref().map(Vec::len));
                match result {
                    Ok(bars) => {
                        summary.succeeded += 1;
                        summary.bars.extend(bars);
                    }
                    Err(e) => {
                        summary.failed += 1;
                        summary.errors.push((symbol.to_string(), e));
                    }
                }
                index += 1;

                if !self.provider.is_available() {
                    for &(_, rest) in &symbols[index..] {
                        summary.failed += 1;
                        summary.errors.push((rest.to_string(), DataError::CircuitBreakerTripped));
                    }
                    break 'batches;
                }
            }
        }

        if registry.bonds && self.provider.is_available() {
            match self.provider.fetch_treasury(window.start.date(), window.end.date()) {
                Ok(rates) => summary.treasury = rates,
                Err(e) => {
                    tracing::warn!(error = %e, "treasury extraction failed");
                    summary.errors.push(("treasury".into(), e));
                }
            }
        }

        progress.on_batch_complete(summary.succeeded, summary.failed, total);
        summary
    }

    /// Fetch one symbol. Indexes arrive at their native interval and are
    /// resampled to the base interval here.
    pub fn extract_symbol(&self, symbol: &str, kind: InstrumentType, window: TimeRange) -> Result<Vec<Bar>, DataError> {
        if !validate_symbol(symbol) {
            return Err(DataError::InvalidSymbol(symbol.to_string()));
        }
        let base = self.options.base_interval_minutes;
        let interval = match kind {
            InstrumentType::Index => self.options.index_native_interval_minutes,
            _ => base,
        };
        let quotes = self.provider.fetch_intraday(symbol, interval, window.start, window.end)?;
        let bars: Vec<Bar> = quotes
            .iter()
            .map(|q| q.to_bar_unchecked(symbol, kind))
            .collect();
        if interval < base {
            Ok(resample(&bars, base))
        } else {
            Ok(bars)
        }
    }
}

fn pause(d: Duration) {
    if !d.is_zero() {
        std::thread::sleep(d);
    }
}
