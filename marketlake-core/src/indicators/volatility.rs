//! Realized volatility: sample standard deviation (divide by N-1) of
//! one-period fractional returns over the trailing `period` returns.
//! Lookback: period.

use super::Indicator;
use crate::domain::Bar;

#[derive(Debug, Clone)]
pub struct Volatility {
    period: usize,
    name: String,
}

impl Volatility {
    pub fn new(period: usize) -> Self {
        assert!(period >= 2, "volatility period must be >= 2");
        Self {
            period,
            name: format!("volatility_{period}"),
        }
    }
}

impl Indicator for Volatility {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period
    }

    fn compute(&self, bars: &[Bar]) -> Vec<f64> {
        let n = bars.len();
        let mut result = vec![f64::NAN; n];

        let returns: Vec<f64> = std::iter::once(f64::NAN)
            .chain(bars.windows(2).map(|w| {
                if w[0].close == 0.0 {
                    f64::NAN
                } else {
                    w[1].close / w[0].close - 1.0
                }
            }))
            .collect();

        for i in self.period..n {
            let window = &returns[(i + 1 - self.period)..=i];
            if window.iter().any(|r| r.is_nan()) {
                continue;
            }
            let mean = window.iter().sum::<f64>() / self.period as f64;
            let variance = window.iter().map(|r| (r - mean).powi(2)).sum::<f64>()
                / (self.period - 1) as f64;
            result[i] = variance.sqrt();
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, make_bars};

    #[test]
    fn constant_growth_has_zero_volatility() {
        let closes: Vec<f64> = (0..10).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        let result = Volatility::new(5).compute(&make_bars(&closes));
        assert!(result[4].is_nan());
        assert_approx(result[5], 0.0, 1e-12);
    }

    #[test]
    fn alternating_returns() {
        // returns +10%, -10%, +10%
        let bars = make_bars(&[100.0, 110.0, 99.0, 108.9]);
        let result = Volatility::new(3).compute(&bars);
        let r = [0.1, -0.1, 0.1];
        let mean = r.iter().sum::<f64>() / 3.0;
        let var = r.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / 2.0;
        assert_approx(result[3], var.sqrt(), 1e-9);
        assert!(result[2].is_nan());
    }

    #[test]
    fn lookback() {
        assert_eq!(Volatility::new(20).lookback(), 20);
        assert!(Volatility::new(2).compute(&make_bars(&[1.0, 2.0]))[1].is_nan());
    }
}
