//! Simple Moving Average (SMA).
//!
//! Rolling mean over a lookback window, of close prices or of volume.
//! Lookback: period - 1 (first valid value at index period-1).

use super::{Indicator, Source};
use crate::domain::Bar;

#[derive(Debug, Clone)]
pub struct Sma {
    period: usize,
    source: Source,
    name: String,
}

impl Sma {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "SMA period must be >= 1");
        Self {
            period,
            source: Source::Close,
            name: format!("sma_{period}"),
        }
    }

    pub fn volume(period: usize) -> Self {
        assert!(period >= 1, "SMA period must be >= 1");
        Self {
            period,
            source: Source::Volume,
            name: format!("volume_sma_{period}"),
        }
    }
}

impl Indicator for Sma {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period.saturating_sub(1)
    }

    fn compute(&self, bars: &[Bar]) -> Vec<f64> {
        let values: Vec<f64> = bars.iter().map(|b| self.source.value(b)).collect();
        sma_of_series(&values, self.period)
    }
}

/// Rolling mean of an arbitrary series. A NaN anywhere in the window makes
/// that output NaN.
pub fn sma_of_series(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n < period {
        return result;
    }

    let mut sum: f64 = values[..period].iter().sum();
    let mut nan_in_window = values[..period].iter().any(|v| v.is_nan());
    if !nan_in_window {
        result[period - 1] = sum / period as f64;
    }

    for i in period..n {
        let leaving = values[i - period];
        let entering = values[i];
        sum = sum - leaving + entering;

        // NaN poisons the running sum, so rescan the window instead
        if entering.is_nan() || leaving.is_nan() || nan_in_window {
            let window = &values[(i + 1 - period)..=i];
            nan_in_window = window.iter().any(|v| v.is_nan());
            sum = window.iter().sum();
            if nan_in_window {
                continue;
            }
        }

        result[i] = sum / period as f64;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, make_bars, DEFAULT_EPSILON};

    #[test]
    fn sma_5_basic() {
        let bars = make_bars(&[10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 16.0]);
        let result = Sma::new(5).compute(&bars);

        assert_eq!(result.len(), 7);
        for v in &result[..4] {
            assert!(v.is_nan());
        }
        assert_approx(result[4], 12.0, DEFAULT_EPSILON);
        assert_approx(result[5], 13.0, DEFAULT_EPSILON);
        assert_approx(result[6], 14.0, DEFAULT_EPSILON);
    }

    #[test]
    fn sma_nan_propagation() {
        let mut bars = make_bars(&[10.0, 11.0, 12.0, 13.0, 14.0, 15.0]);
        bars[2].close = f64::NAN;
        let result = Sma::new(3).compute(&bars);
        assert!(result[2].is_nan());
        assert!(result[3].is_nan());
        assert!(result[4].is_nan());
        // window [13,14,15]
        assert_approx(result[5], 14.0, DEFAULT_EPSILON);
    }

    #[test]
    fn volume_sma_reads_volume() {
        let mut bars = make_bars(&[10.0, 11.0, 12.0]);
        bars[0].volume = 100;
        bars[1].volume = 200;
        bars[2].volume = 600;
        let sma = Sma::volume(3);
        assert_eq!(sma.name(), "volume_sma_3");
        assert_approx(sma.compute(&bars)[2], 300.0, DEFAULT_EPSILON);
    }

    #[test]
    fn sma_too_few_bars_is_withheld() {
        let bars = make_bars(&[10.0; 199]);
        assert!(Sma::new(200).compute(&bars).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn sma_lookback() {
        assert_eq!(Sma::new(20).lookback(), 19);
        assert_eq!(Sma::new(1).lookback(), 0);
    }
}
