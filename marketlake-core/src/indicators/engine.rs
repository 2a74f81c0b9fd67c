//! Indicator computation for one symbol's bar history.
//!
//! The transformer hands over the lookback bars plus the bars in range;
//! every standard indicator is computed once over that series and only the
//! in-range rows are emitted. Short history surfaces as `None` in the row,
//! never as a value computed on a truncated window.

use super::{Bollinger, BollingerBand, Ema, Indicator, Macd, MacdOutput, Roc, Rsi, Sma, Volatility, VolumeRatio};
use crate::domain::{Bar, IndicatorRecord, IndicatorValuesRow, TimeRange};
use std::collections::HashMap;

/// Named indicator series, all the same length as the bar series.
#[derive(Debug, Clone, Default)]
pub struct IndicatorValues {
    series: HashMap<String, Vec<f64>>,
}

impl IndicatorValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, values: Vec<f64>) {
        self.series.insert(name.into(), values);
    }

    /// Value at a bar index; `None` for a missing series, an index out of
    /// range, or a NaN (warmup).
    pub fn get(&self, name: &str, bar_index: usize) -> Option<f64> {
        self.series
            .get(name)
            .and_then(|v| v.get(bar_index).copied())
            .filter(|v| v.is_finite())
    }

    pub fn get_series(&self, name: &str) -> Option<&[f64]> {
        self.series.get(name).map(|v| v.as_slice())
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Assemble the `technical_indicators` row for one bar.
    pub fn row(&self, i: usize) -> IndicatorValuesRow {
        IndicatorValuesRow {
            sma_20: self.get("sma_20", i),
            sma_50: self.get("sma_50", i),
            sma_200: self.get("sma_200", i),
            ema_12: self.get("ema_12", i),
            ema_26: self.get("ema_26", i),
            macd: self.get("macd", i),
            macd_signal: self.get("macd_signal", i),
            macd_histogram: self.get("macd_histogram", i),
            rsi_14: self.get("rsi_14", i),
            bb_upper: self.get("bb_upper", i),
            bb_mid: self.get("bb_mid", i),
            bb_lower: self.get("bb_lower", i),
            bb_width: self.get("bb_width", i),
            bb_position: self.get("bb_position", i),
            volume_sma_20: self.get("volume_sma_20", i),
            volume_ratio: self.get("volume_ratio_20", i),
            price_change_1d: self.get("roc_1", i),
            price_change_5d: self.get("roc_5", i),
            price_change_20d: self.get("roc_20", i),
            volatility_20d: self.get("volatility_20", i),
        }
    }
}

/// The full indicator set, in dependency order.
pub fn standard_indicators() -> Vec<Box<dyn Indicator>> {
    vec![
        Box::new(Sma::new(20)),
        Box::new(Sma::new(50)),
        Box::new(Sma::new(200)),
        Box::new(Ema::new(12)),
        Box::new(Ema::new(26)),
        Box::new(Macd::standard(MacdOutput::Line)),
        Box::new(Macd::standard(MacdOutput::Signal)),
        Box::new(Macd::standard(MacdOutput::Histogram)),
        Box::new(Rsi::new(14)),
        Box::new(Bollinger::new(20, 2.0, BollingerBand::Upper)),
        Box::new(Bollinger::new(20, 2.0, BollingerBand::Middle)),
        Box::new(Bollinger::new(20, 2.0, BollingerBand::Lower)),
        Box::new(Bollinger::new(20, 2.0, BollingerBand::Width)),
        Box::new(Bollinger::new(20, 2.0, BollingerBand::Position)),
        Box::new(Sma::volume(20)),
        Box::new(VolumeRatio::new(20)),
        Box::new(Roc::new(1)),
        Box::new(Roc::new(5)),
        Box::new(Roc::new(20)),
        Box::new(Volatility::new(20)),
    ]
}

/// Largest lookback in a set; the number of prior bars needed before every
/// indicator is defined.
pub fn max_lookback(indicators: &[Box<dyn Indicator>]) -> usize {
    indicators.iter().map(|i| i.lookback()).max().unwrap_or(0)
}

/// Compute every indicator over a chronologically sorted bar series.
pub fn compute_indicators(bars: &[Bar], indicators: &[Box<dyn Indicator>]) -> IndicatorValues {
    let mut iv = IndicatorValues::new();
    for indicator in indicators {
        let series = indicator.compute(bars);
        debug_assert_eq!(
            series.len(),
            bars.len(),
            "indicator '{}' produced {} values for {} bars",
            indicator.name(),
            series.len(),
            bars.len(),
        );
        iv.insert(indicator.name(), series);
    }
    iv
}

/// Records for the bars of `bars` that fall inside `range`. `bars` must be
/// sorted by timestamp and belong to one symbol.
pub fn indicator_records(bars: &[Bar], range: TimeRange, indicators: &[Box<dyn Indicator>]) -> Vec<IndicatorRecord> {
    let iv = compute_indicators(bars, indicators);
    bars.iter()
        .enumerate()
        .filter(|(_, bar)| range.contains(bar.timestamp))
        .map(|(i, bar)| IndicatorRecord {
            symbol: bar.symbol.clone(),
            table_type: bar.instrument_type,
            timestamp: bar.timestamp,
            values: iv.row(i),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::make_bars;

    fn closes(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + (i as f64 / 7.0).sin() * 3.0 + i as f64 * 0.05).collect()
    }

    #[test]
    fn standard_set_names_are_unique() {
        let set = standard_indicators();
        let mut names: Vec<&str> = set.iter().map(|i| i.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), set.len());
        assert_eq!(max_lookback(&set), 199);
    }

    #[test]
    fn short_history_withholds_sma_200() {
        let bars = make_bars(&closes(120));
        let iv = compute_indicators(&bars, &standard_indicators());
        let row = iv.row(119);
        assert!(row.sma_20.is_some());
        assert!(row.sma_50.is_some());
        assert!(row.sma_200.is_none());
        assert!(row.macd_signal.is_some());
        assert!(row.rsi_14.is_some());
    }

    #[test]
    fn full_history_fills_every_column() {
        let bars = make_bars(&closes(253));
        let iv = compute_indicators(&bars, &standard_indicators());
        let row = iv.row(252);
        assert!(row.sma_200.is_some());
        assert!(row.macd.is_some());
        assert!(row.macd_histogram.is_some());
        assert!(row.bb_position.is_some());
        assert!(row.volume_ratio.is_some());
        assert!(row.price_change_20d.is_some());
        assert!(row.volatility_20d.is_some());
    }

    #[test]
    fn records_only_cover_the_range() {
        let bars = make_bars(&closes(30));
        let range = TimeRange::new(bars[27].timestamp, bars[29].timestamp);
        let records = indicator_records(&bars, range, &standard_indicators());
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].timestamp, bars[27].timestamp);
        assert!(records.iter().all(|r| r.symbol == "TEST"));
    }

    #[test]
    fn truncation_does_not_change_earlier_values() {
        let bars = make_bars(&closes(80));
        let set = standard_indicators();
        let full = compute_indicators(&bars, &set);
        let truncated = compute_indicators(&bars[..60], &set);
        for name in ["sma_20", "ema_26", "macd_signal", "rsi_14", "bb_upper", "volatility_20"] {
            assert_eq!(full.get(name, 59), truncated.get(name, 59), "{name}");
        }
    }
}
