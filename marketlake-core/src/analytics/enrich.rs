//! Enriched analytics rows for the `*_data` tables.

use crate::domain::{AnalyticsBar, Bar, TimeRange};
use chrono::Duration;

/// Trailing window for relative volume, in calendar days.
pub const RELATIVE_VOLUME_DAYS: i64 = 30;

/// 0..=100; starts at 100 and loses points for suspicious bars.
pub fn quality_score(bar: &Bar) -> u8 {
    let mut score: i32 = 100;
    let body_low = bar.open.min(bar.close);
    let body_high = bar.open.max(bar.close);
    if !(bar.low <= body_low && body_high <= bar.high) {
        score -= 30;
    }
    if bar.volume <= 0 {
        score -= 20;
    }
    if intrabar_volatility(bar) > 20.0 {
        score -= 10;
    }
    if bar.close > 0.0 && (bar.high - bar.low) / bar.close > 0.10 {
        score -= 10;
    }
    score.clamp(0, 100) as u8
}

/// Intrabar range as a percentage of close.
fn intrabar_volatility(bar: &Bar) -> f64 {
    if bar.close > 0.0 {
        (bar.high - bar.low) / bar.close * 100.0
    } else {
        0.0
    }
}

/// Enrich the bars inside `range`. `bars` is one symbol's chronologically
/// sorted history, including bars before the range so the first in-range
/// bar has a previous close and a relative-volume baseline.
pub fn enrich(bars: &[Bar], range: TimeRange) -> Vec<AnalyticsBar> {
    let window = Duration::days(RELATIVE_VOLUME_DAYS);
    let mut out = Vec::new();

    // Sliding sum over bars in [ts - 30d, ts)
    let mut tail = 0;
    let mut volume_sum: i64 = 0;
    for (i, bar) in bars.iter().enumerate() {
        while tail < i && bars[tail].timestamp < bar.timestamp - window {
            volume_sum -= bars[tail].volume;
            tail += 1;
        }

        if range.contains(bar.timestamp) {
            let prev_close = i.checked_sub(1).map(|p| bars[p].close);
            let price_change = prev_close.map(|p| bar.close - p);
            let price_change_pct = prev_close
                .filter(|p| *p != 0.0)
                .map(|p| (bar.close - p) / p * 100.0);
            let samples = i - tail;
            let relative_volume = (samples > 0 && volume_sum > 0)
                .then(|| bar.volume as f64 / (volume_sum as f64 / samples as f64));

            out.push(AnalyticsBar {
                symbol: bar.symbol.clone(),
                instrument_type: bar.instrument_type,
                timestamp: bar.timestamp,
                open: bar.open,
                high: bar.high,
                low: bar.low,
                close: bar.close,
                volume: bar.volume,
                price_change,
                price_change_pct,
                avg_price: bar.avg_price(),
                volatility: intrabar_volatility(bar),
                relative_volume,
                data_quality_score: quality_score(bar),
            });
        }

        volume_sum += bar.volume;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::InstrumentType;
    use chrono::{NaiveDate, NaiveDateTime};

    fn ts(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    fn bar(at: NaiveDateTime, o: f64, h: f64, l: f64, c: f64, v: i64) -> Bar {
        Bar {
            symbol: "AAPL".into(),
            instrument_type: InstrumentType::Stock,
            timestamp: at,
            open: o,
            high: h,
            low: l,
            close: c,
            volume: v,
        }
    }

    #[test]
    fn clean_bar_scores_100() {
        assert_eq!(quality_score(&bar(ts(2, 9, 30), 10.0, 10.5, 9.8, 10.2, 100)), 100);
    }

    #[test]
    fn penalties_accumulate() {
        // broken OHLC, zero volume, huge range
        let b = bar(ts(2, 9, 30), 10.0, 9.0, 5.0, 6.0, 0);
        assert_eq!(quality_score(&b), 100 - 30 - 20 - 10 - 10);
    }

    #[test]
    fn first_in_range_bar_uses_history() {
        let bars = vec![
            bar(ts(2, 9, 30), 10.0, 10.5, 9.5, 10.0, 100),
            bar(ts(2, 9, 45), 10.0, 10.6, 9.9, 10.5, 300),
        ];
        let range = TimeRange::new(ts(2, 9, 45), ts(2, 9, 45));
        let rows = enrich(&bars, range);
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert!((row.price_change.unwrap() - 0.5).abs() < 1e-12);
        assert!((row.price_change_pct.unwrap() - 5.0).abs() < 1e-12);
        assert!((row.relative_volume.unwrap() - 3.0).abs() < 1e-12);
        assert!((row.avg_price - (10.6 + 9.9 + 10.5) / 3.0).abs() < 1e-12);
    }

    #[test]
    fn no_history_means_no_change_or_relative_volume() {
        let bars = vec![bar(ts(2, 9, 30), 10.0, 10.5, 9.5, 10.0, 100)];
        let rows = enrich(&bars, TimeRange::day(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()));
        assert_eq!(rows[0].price_change, None);
        assert_eq!(rows[0].relative_volume, None);
    }

    #[test]
    fn relative_volume_ignores_bars_older_than_window() {
        let old = NaiveDate::from_ymd_opt(2023, 11, 1).unwrap().and_hms_opt(9, 30, 0).unwrap();
        let bars = vec![
            bar(old, 10.0, 10.5, 9.5, 10.0, 1_000_000),
            bar(ts(2, 9, 30), 10.0, 10.5, 9.5, 10.0, 100),
            bar(ts(2, 9, 45), 10.0, 10.5, 9.5, 10.0, 200),
        ];
        let rows = enrich(&bars, TimeRange::new(ts(2, 9, 45), ts(2, 9, 45)));
        assert!((rows[0].relative_volume.unwrap() - 2.0).abs() < 1e-12);
    }
}
