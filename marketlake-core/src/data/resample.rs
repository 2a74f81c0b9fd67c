//! OHLCV roll-ups: resampling fine bars to the base interval and folding
//! intraday bars into daily aggregates.
//!
//! Both use the same rule per group: first open, max high, min low, last
//! close, summed volume. Groups are formed by (symbol, bucket) after sorting
//! chronologically, so input order does not matter.

use super::market_hours::MarketHours;
use crate::domain::{Bar, DailyAggregate};
use std::collections::BTreeMap;

struct Group {
    first: Bar,
    high: f64,
    low: f64,
    close: f64,
    volume: i64,
    weighted_price: f64,
    count: usize,
}

impl Group {
    fn start(bar: &Bar) -> Self {
        Self {
            first: bar.clone(),
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            weighted_price: bar.avg_price() * bar.volume as f64,
            count: 1,
        }
    }

    fn push(&mut self, bar: &Bar) {
        self.high = self.high.max(bar.high);
        self.low = self.low.min(bar.low);
        self.close = bar.close;
        self.volume += bar.volume;
        self.weighted_price += bar.avg_price() * bar.volume as f64;
        self.count += 1;
    }
}

fn sorted(bars: &[Bar]) -> Vec<&Bar> {
    let mut refs: Vec<&Bar> = bars.iter().collect();
    refs.sort_by(|a, b| {
        a.symbol
            .cmp(&b.symbol)
            .then(a.timestamp.cmp(&b.timestamp))
    });
    refs
}

/// Aggregate bars into `interval_minutes` buckets. Each output bar is stamped
/// with its bucket start. Bars already on the interval pass through unchanged.
pub fn resample(bars: &[Bar], interval_minutes: u32) -> Vec<Bar> {
    let mut groups: BTreeMap<(String, chrono::NaiveDateTime), Group> = BTreeMap::new();
    for bar in sorted(bars) {
        let bucket = MarketHours::floor_to_interval(bar.timestamp, interval_minutes);
        groups
            .entry((bar.symbol.clone(), bucket))
            .and_modify(|g| g.push(bar))
            .or_insert_with(|| Group::start(bar));
    }
    groups
        .into_iter()
        .map(|((_, bucket), g)| Bar {
            symbol: g.first.symbol,
            instrument_type: g.first.instrument_type,
            timestamp: bucket,
            open: g.first.open,
            high: g.high,
            low: g.low,
            close: g.close,
            volume: g.volume,
        })
        .collect()
}

/// Fold intraday bars into one aggregate per (symbol, calendar date).
pub fn roll_up_daily(bars: &[Bar]) -> Vec<DailyAggregate> {
    let mut groups: BTreeMap<(String, chrono::NaiveDate), Group> = BTreeMap::new();
    for bar in sorted(bars) {
        groups
            .entry((bar.symbol.clone(), bar.timestamp.date()))
            .and_modify(|g| g.push(bar))
            .or_insert_with(|| Group::start(bar));
    }
    groups
        .into_iter()
        .map(|((_, date), g)| DailyAggregate {
            symbol: g.first.symbol,
            table_type: g.first.instrument_type,
            date,
            open: g.first.open,
            high: g.high,
            low: g.low,
            close: g.close,
            volume: g.volume,
            vwap: (g.volume > 0).then(|| g.weighted_price / g.volume as f64),
            bar_count: g.count,
        })
        .collect()
}
