//! Technical indicators.
//!
//! Every indicator implements [`Indicator`]: a pure function from a bar
//! series to a numeric series of the same length, with `f64::NAN` for bars
//! whose lookback window is not yet filled. Multi-series indicators (MACD,
//! Bollinger) are exposed as separate named instances per output, keeping
//! the single-series trait unchanged.
//!
//! [`engine`] assembles the standard set and turns the series into
//! `technical_indicators` rows.

pub mod bollinger;
pub mod ema;
pub mod engine;
pub mod macd;
pub mod roc;
pub mod rsi;
pub mod sma;
pub mod volatility;
pub mod volume;

pub use bollinger::{Bollinger, BollingerBand};
pub use ema::{ema_of_series, Ema};
pub use engine::{compute_indicators, indicator_records, max_lookback, standard_indicators, IndicatorValues};
pub use macd::{Macd, MacdOutput};
pub use roc::Roc;
pub use rsi::Rsi;
pub use sma::Sma;
pub use volatility::Volatility;
pub use volume::VolumeRatio;

use crate::domain::Bar;

/// Trait for indicators.
///
/// # Look-ahead contamination guard
/// No indicator value at bar t may depend on bar t+1 or later. Values for
/// bars inside a window are therefore identical whether the series is
/// truncated at t or extended past it.
pub trait Indicator: Send + Sync {
    /// Column-style name (e.g., "sma_20", "rsi_14").
    fn name(&self) -> &str;

    /// Number of bars needed before the indicator produces valid output.
    fn lookback(&self) -> usize;

    /// Returns a `Vec<f64>` of the same length as `bars`.
    fn compute(&self, bars: &[Bar]) -> Vec<f64>;
}

/// Which bar field a moving average reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Close,
    Volume,
}

impl Source {
    pub fn value(self, bar: &Bar) -> f64 {
        match self {
            Source::Close => bar.close,
            Source::Volume => bar.volume as f64,
        }
    }
}

/// Create synthetic 15-minute bars from close prices for testing.
///
/// Generates plausible OHLV: open = prev_close (or close for first bar),
/// high = max(open,close) + 1.0, low = min(open,close) - 1.0, volume = 1000.
#[cfg(test)]
pub fn make_bars(closes: &[f64]) -> Vec<Bar> {
    use crate::domain::InstrumentType;
    let start = chrono::NaiveDate::from_ymd_opt(2024, 1, 2)
        .unwrap()
        .and_hms_opt(9, 30, 0)
        .unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            Bar {
                symbol: "TEST".to_string(),
                instrument_type: InstrumentType::Stock,
                timestamp: start + chrono::Duration::minutes(15 * i as i64),
                open,
                high: open.max(close) + 1.0,
                low: open.min(close) - 1.0,
                close,
                volume: 1000,
            }
        })
        .collect()
}

/// Assert two f64 values are approximately equal (within epsilon).
#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

/// Default epsilon for indicator tests.
#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;
