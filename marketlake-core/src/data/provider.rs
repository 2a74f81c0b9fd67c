//! Data provider trait and structured error types.
//!
//! The DataProvider trait abstracts over the upstream API so the extractor
//! can be driven by a mock in tests.

use crate::domain::{Bar, BarRejection, InstrumentType, TreasuryRate};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One upstream quote before it is typed as a [`Bar`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawQuote {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl RawQuote {
    pub fn into_bar(self, symbol: &str, kind: InstrumentType) -> Result<Bar, BarRejection> {
        Bar::new(
            symbol,
            kind,
            self.timestamp,
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume,
        )
    }

    /// Typed bar without validation; the raw loader decides what to reject.
    pub fn to_bar_unchecked(&self, symbol: &str, kind: InstrumentType) -> Bar {
        Bar {
            symbol: symbol.to_string(),
            instrument_type: kind,
            timestamp: self.timestamp,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

#[derive(Debug, Error)]
pub enum DataError {
    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("upstream returned HTTP {status} for {symbol}")]
    Upstream { status: u16, symbol: String },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("invalid symbol '{0}'")]
    InvalidSymbol(String),

    #[error("csv error in {path}: {message}")]
    Csv { path: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DataError {
    /// Whether a retry has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::RateLimited { .. } => true,
            Self::Upstream { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub trait DataProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Intraday bars at `interval_minutes` between `from` and `to`
    /// (exchange-local, inclusive). Order is provider-defined.
    fn fetch_intraday(
        &self,
        symbol: &str,
        interval_minutes: u32,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<RawQuote>, DataError>;

    /// Daily treasury yield curves between two dates.
    fn fetch_treasury(&self, from: NaiveDate, to: NaiveDate)
        -> Result<Vec<TreasuryRate>, DataError>;

    /// Check if the provider is currently available (not rate-limited, not blocked).
    fn is_available(&self) -> bool;
}

/// Progress callback for multi-symbol extraction.
pub trait ExtractProgress: Send {
    fn on_start(&self, symbol: &str, index: usize, total: usize);

    fn on_complete(&self, symbol: &str, index: usize, total: usize, result: Result<usize, &DataError>);

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize);
}

/// Reports extraction progress through `tracing`.
pub struct LogProgress;

impl ExtractProgress for LogProgress {
    fn on_start(&self, symbol: &str, index: usize, total: usize) {
        tracing::debug!(symbol, position = index + 1, total, "fetching");
    }

    fn on_complete(
        &self,
        symbol: &str,
        _index: usize,
        _total: usize,
        result: Result<usize, &DataError>,
    ) {
        match result {
            Ok(bars) => tracing::info!(symbol, bars, "extracted"),
            Err(e) => tracing::warn!(symbol, error = %e, "extraction failed"),
        }
    }

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize) {
        tracing::info!(succeeded, failed, total, "extraction complete");
    }
}

/// Discards progress events.
pub struct SilentProgress;

impl ExtractProgress for SilentProgress {
    fn on_start(&self, _: &str, _: usize, _: usize) {}
    fn on_complete(&self, _: &str, _: usize, _: usize, _: Result<usize, &DataError>) {}
    fn on_batch_complete(&self, _: usize, _: usize, _: usize) {}
}
