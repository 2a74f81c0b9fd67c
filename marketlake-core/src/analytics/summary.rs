//! Market summary math over one day's aggregates.
//!
//! A symbol's daily change compares its close with the previous trading
//! day's close, falling back to the day's own open when no earlier day is
//! stored.

use crate::domain::{DailyAggregate, InstrumentType, MarketSummary, Mover};
use chrono::NaiveDate;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct DailyChange {
    pub symbol: String,
    pub change_pct: f64,
    pub volume: i64,
}

pub fn daily_changes(days: &[DailyAggregate], previous_close: &HashMap<String, f64>) -> Vec<DailyChange> {
    days.iter()
        .filter_map(|d| {
            let base = previous_close.get(&d.symbol).copied().unwrap_or(d.open);
            (base > 0.0).then(|| DailyChange {
                symbol: d.symbol.clone(),
                change_pct: (d.close - base) / base * 100.0,
                volume: d.volume,
            })
        })
        .collect()
}

/// Summary for one (date, market). `None` when no symbol has a usable change.
pub fn market_summary(
    date: NaiveDate,
    market: InstrumentType,
    days: &[DailyAggregate],
    previous_close: &HashMap<String, f64>,
    top_n: usize,
) -> Option<MarketSummary> {
    let mut changes = daily_changes(days, previous_close);
    if changes.is_empty() {
        return None;
    }
    let total = changes.len();
    let total_volume: i64 = changes.iter().map(|c| c.volume).sum();
    let advancing = changes.iter().filter(|c| c.change_pct > 0.0).count();
    let declining = changes.iter().filter(|c| c.change_pct < 0.0).count();
    let up_volume: i64 = changes.iter().filter(|c| c.change_pct > 0.0).map(|c| c.volume).sum();
    let down_volume: i64 = changes.iter().filter(|c| c.change_pct < 0.0).map(|c| c.volume).sum();

    changes.sort_by(|a, b| b.change_pct.total_cmp(&a.change_pct).then_with(|| a.symbol.cmp(&b.symbol)));
    let mover = |c: &DailyChange| Mover {
        symbol: c.symbol.clone(),
        change_pct: c.change_pct,
    };
    let top_gainers = changes.iter().take(top_n).map(mover).collect();
    let top_losers = changes.iter().rev().take(top_n).map(mover).collect();

    Some(MarketSummary {
        date,
        market,
        total_symbols: total,
        avg_volume: total_volume as f64 / total as f64,
        total_volume,
        up_volume,
        down_volume,
        avg_price_change: changes.iter().map(|c| c.change_pct).sum::<f64>() / total as f64,
        top_gainers,
        top_losers,
        advancing,
        declining,
        unchanged: total - advancing - declining,
        market_breadth: (advancing as f64 - declining as f64) / total as f64 * 100.0,
        advance_decline_ratio: (declining > 0).then(|| advancing as f64 / declining as f64),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(symbol: &str, open: f64, close: f64, volume: i64) -> DailyAggregate {
        DailyAggregate {
            symbol: symbol.into(),
            table_type: InstrumentType::Stock,
            date: NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            volume,
            vwap: None,
            bar_count: 26,
        }
    }

    #[test]
    fn change_uses_previous_close_then_open() {
        let days = [day("AAPL", 100.0, 110.0, 10), day("MSFT", 200.0, 190.0, 20)];
        let prev = HashMap::from([("AAPL".to_string(), 105.0)]);
        let changes = daily_changes(&days, &prev);
        assert!((changes[0].change_pct - (110.0 - 105.0) / 105.0 * 100.0).abs() < 1e-12);
        assert!((changes[1].change_pct - (-5.0)).abs() < 1e-12);
    }

    #[test]
    fn breadth_and_movers() {
        let days = [
            day("A", 10.0, 11.0, 100),
            day("B", 10.0, 12.0, 100),
            day("C", 10.0, 9.0, 100),
            day("D", 10.0, 10.0, 100),
        ];
        let s = market_summary(days[0].date, InstrumentType::Stock, &days, &HashMap::new(), 2).unwrap();
        assert_eq!((s.advancing, s.declining, s.unchanged), (2, 1, 1));
        assert!((s.market_breadth - 25.0).abs() < 1e-12);
        assert_eq!(s.advance_decline_ratio, Some(2.0));
        assert_eq!(s.total_volume, 400);
        assert_eq!((s.up_volume, s.down_volume), (200, 100));
        let gainers: Vec<&str> = s.top_gainers.iter().map(|m| m.symbol.as_str()).collect();
        let losers: Vec<&str> = s.top_losers.iter().map(|m| m.symbol.as_str()).collect();
        assert_eq!(gainers, vec!["B", "A"]);
        assert_eq!(losers, vec!["C", "D"]);
    }

    #[test]
    fn unchanged_volume_is_neither_up_nor_down() {
        let days = [day("A", 10.0, 11.0, 300), day("B", 10.0, 10.0, 50), day("C", 10.0, 8.0, 70)];
        let s = market_summary(days[0].date, InstrumentType::Stock, &days, &HashMap::new(), 1).unwrap();
        assert_eq!(s.total_volume, 420);
        assert_eq!(s.up_volume, 300);
        assert_eq!(s.down_volume, 70);
    }

    #[test]
    fn no_decliners_means_no_ratio() {
        let days = [day("A", 10.0, 11.0, 1)];
        let s = market_summary(days[0].date, InstrumentType::Stock, &days, &HashMap::new(), 5).unwrap();
        assert_eq!(s.advance_decline_ratio, None);
        assert!(market_summary(days[0].date, InstrumentType::Stock, &[], &HashMap::new(), 5).is_none());
    }
}
