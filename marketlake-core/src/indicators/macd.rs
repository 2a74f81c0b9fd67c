//! Moving Average Convergence/Divergence (MACD).
//!
//! Three outputs (separate Indicator instances):
//! - Line: EMA(fast) - EMA(slow)
//! - Signal: EMA(signal) of the line, seeded from its first valid values
//! - Histogram: line - signal
//!
//! Lookback: slow - 1 for the line, slow + signal - 2 for signal and histogram.

use super::ema::ema_of_series;
use super::Indicator;
use crate::domain::Bar;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacdOutput {
    Line,
    Signal,
    Histogram,
}

#[derive(Debug, Clone)]
pub struct Macd {
    fast: usize,
    slow: usize,
    signal: usize,
    output: MacdOutput,
    name: String,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize, output: MacdOutput) -> Self {
        assert!(fast >= 1 && slow > fast, "MACD needs 1 <= fast < slow");
        assert!(signal >= 1, "MACD signal period must be >= 1");
        let name = match output {
            MacdOutput::Line => "macd",
            MacdOutput::Signal => "macd_signal",
            MacdOutput::Histogram => "macd_histogram",
        };
        Self {
            fast,
            slow,
            signal,
            output,
            name: name.to_string(),
        }
    }

    /// The 12/26/9 configuration.
    pub fn standard(output: MacdOutput) -> Self {
        Self::new(12, 26, 9, output)
    }
}

impl Indicator for Macd {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        match self.output {
            MacdOutput::Line => self.slow - 1,
            MacdOutput::Signal | MacdOutput::Histogram => self.slow + self.signal - 2,
        }
    }

    fn compute(&self, bars: &[Bar]) -> Vec<f64> {
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let fast = ema_of_series(&closes, self.fast);
        let slow = ema_of_series(&closes, self.slow);
        let line: Vec<f64> = fast.iter().zip(&slow).map(|(f, s)| f - s).collect();
        if self.output == MacdOutput::Line {
            return line;
        }

        // The line is NaN during warmup; seed the signal EMA after it.
        let mut signal = vec![f64::NAN; line.len()];
        if let Some(first) = line.iter().position(|v| !v.is_nan()) {
            let tail = ema_of_series(&line[first..], self.signal);
            signal[first..].copy_from_slice(&tail);
        }
        match self.output {
            MacdOutput::Signal => signal,
            _ => line.iter().zip(&signal).map(|(l, s)| l - s).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, make_bars};

    fn closes(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + (i as f64 * 0.3).sin() * 5.0 + i as f64 * 0.1).collect()
    }

    #[test]
    fn warmup_lengths() {
        let bars = make_bars(&closes(60));
        let line = Macd::standard(MacdOutput::Line).compute(&bars);
        let signal = Macd::standard(MacdOutput::Signal).compute(&bars);
        assert!(line[24].is_nan());
        assert!(!line[25].is_nan());
        assert!(signal[32].is_nan());
        assert!(!signal[33].is_nan());
        assert_eq!(Macd::standard(MacdOutput::Signal).lookback(), 33);
    }

    #[test]
    fn histogram_is_line_minus_signal() {
        let bars = make_bars(&closes(80));
        let line = Macd::standard(MacdOutput::Line).compute(&bars);
        let signal = Macd::standard(MacdOutput::Signal).compute(&bars);
        let hist = Macd::standard(MacdOutput::Histogram).compute(&bars);
        for i in 33..80 {
            assert_approx(hist[i], line[i] - signal[i], 1e-9);
        }
    }

    #[test]
    fn flat_series_has_zero_macd() {
        let bars = make_bars(&[50.0; 40]);
        let hist = Macd::standard(MacdOutput::Histogram).compute(&bars);
        assert_approx(hist[39], 0.0, 1e-12);
    }
}
