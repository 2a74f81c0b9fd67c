//! Bollinger Bands: moving average +/- standard deviation multiplier.
//!
//! Five outputs (separate Indicator instances):
//! - Middle: SMA(close, period)
//! - Upper / Lower: middle +/- mult * stddev(close, period)
//! - Width: (upper - lower) / middle * 100
//! - Position: (close - lower) / (upper - lower) * 100, NaN when the band
//!   has zero width
//!
//! Uses sample stddev (divide by N - 1), so a period of 1 has no bands
//! and only the middle line is defined.
//! Lookback: period - 1.

use super::Indicator;
use crate::domain::Bar;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BollingerBand {
    Upper,
    Middle,
    Lower,
    Width,
    Position,
}

#[derive(Debug, Clone)]
pub struct Bollinger {
    period: usize,
    multiplier: f64,
    band: BollingerBand,
    name: String,
}

impl Bollinger {
    pub fn new(period: usize, multiplier: f64, band: BollingerBand) -> Self {
        assert!(period >= 1, "Bollinger period must be >= 1");
        let name = match band {
            BollingerBand::Upper => "bb_upper",
            BollingerBand::Middle => "bb_mid",
            BollingerBand::Lower => "bb_lower",
            BollingerBand::Width => "bb_width",
            BollingerBand::Position => "bb_position",
        };
        Self {
            period,
            multiplier,
            band,
            name: name.to_string(),
        }
    }

    pub fn upper(period: usize, multiplier: f64) -> Self {
        Self::new(period, multiplier, BollingerBand::Upper)
    }

    pub fn middle(period: usize, multiplier: f64) -> Self {
        Self::new(period, multiplier, BollingerBand::Middle)
    }

    pub fn lower(period: usize, multiplier: f64) -> Self {
        Self::new(period, multiplier, BollingerBand::Lower)
    }
}

impl Indicator for Bollinger {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period.saturating_sub(1)
    }

    fn compute(&self, bars: &[Bar]) -> Vec<f64> {
        let n = bars.len();
        let mut result = vec![f64::NAN; n];

        if n < self.period {
            return result;
        }

        for i in (self.period - 1)..n {
            let window = &bars[(i + 1 - self.period)..=i];
            if window.iter().any(|b| b.close.is_nan()) {
                continue;
            }

            let mean = window.iter().map(|b| b.close).sum::<f64>() / self.period as f64;
            let variance = window
                .iter()
                .map(|b| {
                    let diff = b.close - mean;
                    diff * diff
                })
                .sum::<f64>()
                / (self.period - 1) as f64;
            let offset = self.multiplier * variance.sqrt();
            let (upper, lower) = (mean + offset, mean - offset);

            result[i] = match self.band {
                BollingerBand::Middle => mean,
                BollingerBand::Upper => upper,
                BollingerBand::Lower => lower,
                BollingerBand::Width if mean != 0.0 => (upper - lower) / mean * 100.0,
                BollingerBand::Position if upper > lower => {
                    (bars[i].close - lower) / (upper - lower) * 100.0
                }
                BollingerBand::Width | BollingerBand::Position => f64::NAN,
            };
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, make_bars, DEFAULT_EPSILON};

    #[test]
    fn bollinger_middle_is_sma() {
        let bars = make_bars(&[10.0, 11.0, 12.0, 13.0, 14.0]);
        let result = Bollinger::middle(3, 2.0).compute(&bars);
        assert!(result[1].is_nan());
        assert_approx(result[2], 11.0, DEFAULT_EPSILON);
        assert_approx(result[3], 12.0, DEFAULT_EPSILON);
    }

    #[test]
    fn bands_use_sample_stddev() {
        // window [10, 11, 12]: sample variance = 2 / (3 - 1) = 1
        let bars = make_bars(&[10.0, 11.0, 12.0]);
        assert_approx(Bollinger::upper(3, 2.0).compute(&bars)[2], 13.0, DEFAULT_EPSILON);
        assert_approx(Bollinger::lower(3, 2.0).compute(&bars)[2], 9.0, DEFAULT_EPSILON);
    }

    #[test]
    fn matches_sample_stddev_over_twenty_closes() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + (i % 5) as f64).collect();
        let mean = closes.iter().sum::<f64>() / 20.0;
        let var = closes.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / 19.0;
        let bars = make_bars(&closes);
        let upper = Bollinger::upper(20, 2.0).compute(&bars);
        assert_approx(upper[19], mean + 2.0 * var.sqrt(), 1e-9);
    }

    #[test]
    fn single_period_has_middle_but_no_bands() {
        let bars = make_bars(&[10.0, 11.0]);
        assert_approx(Bollinger::middle(1, 2.0).compute(&bars)[1], 11.0, DEFAULT_EPSILON);
        assert!(Bollinger::upper(1, 2.0).compute(&bars)[1].is_nan());
        assert!(Bollinger::lower(1, 2.0).compute(&bars)[1].is_nan());
        assert!(Bollinger::new(1, 2.0, BollingerBand::Position).compute(&bars)[1].is_nan());
    }

    #[test]
    fn width_and_position() {
        let bars = make_bars(&[10.0, 11.0, 12.0]);
        let sd = 1.0;
        let width = Bollinger::new(3, 2.0, BollingerBand::Width).compute(&bars)[2];
        assert_approx(width, 4.0 * sd / 11.0 * 100.0, 1e-9);
        let position = Bollinger::new(3, 2.0, BollingerBand::Position).compute(&bars)[2];
        // close 12 sits above the middle
        assert_approx(position, (12.0 - (11.0 - 2.0 * sd)) / (4.0 * sd) * 100.0, 1e-9);
    }

    #[test]
    fn flat_window_has_no_position() {
        let bars = make_bars(&[10.0; 5]);
        let position = Bollinger::new(3, 2.0, BollingerBand::Position).compute(&bars);
        assert!(position[4].is_nan());
        let width = Bollinger::new(3, 2.0, BollingerBand::Width).compute(&bars);
        assert_approx(width[4], 0.0, DEFAULT_EPSILON);
    }
}
