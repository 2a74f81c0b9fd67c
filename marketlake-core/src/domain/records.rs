//! Derived analytics records written by the transformer.

use super::bar::InstrumentType;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Technical indicator values for one bar. `None` marks a value withheld
/// because the lookback window was not yet filled.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IndicatorValuesRow {
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub sma_200: Option<f64>,
    pub ema_12: Option<f64>,
    pub ema_26: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub rsi_14: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_mid: Option<f64>,
    pub bb_lower: Option<f64>,
    pub bb_width: Option<f64>,
    pub bb_position: Option<f64>,
    pub volume_sma_20: Option<f64>,
    pub volume_ratio: Option<f64>,
    pub price_change_1d: Option<f64>,
    pub price_change_5d: Option<f64>,
    pub price_change_20d: Option<f64>,
    pub volatility_20d: Option<f64>,
}

/// Keyed by (symbol, table_type, timestamp).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorRecord {
    pub symbol: String,
    pub table_type: InstrumentType,
    pub timestamp: NaiveDateTime,
    pub values: IndicatorValuesRow,
}

/// Per-bar enrichment landed in the `*_data` analytics tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsBar {
    pub symbol: String,
    pub instrument_type: InstrumentType,
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub price_change: Option<f64>,
    pub price_change_pct: Option<f64>,
    pub avg_price: f64,
    /// Intrabar range as a percentage of close.
    pub volatility: f64,
    pub relative_volume: Option<f64>,
    pub data_quality_score: u8,
}

/// Daily roll-up of intraday bars, keyed by (symbol, date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAggregate {
    pub symbol: String,
    pub table_type: InstrumentType,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub vwap: Option<f64>,
    pub bar_count: usize,
}

/// One entry of a top gainers / losers list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mover {
    pub symbol: String,
    pub change_pct: f64,
}

/// Market-wide statistics for one (date, market).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSummary {
    pub date: NaiveDate,
    pub market: InstrumentType,
    pub total_symbols: usize,
    pub avg_volume: f64,
    pub total_volume: i64,
    /// Volume of advancing symbols.
    pub up_volume: i64,
    /// Volume of declining symbols.
    pub down_volume: i64,
    pub avg_price_change: f64,
    pub top_gainers: Vec<Mover>,
    pub top_losers: Vec<Mover>,
    pub advancing: usize,
    pub declining: usize,
    pub unchanged: usize,
    /// (advancing - declining) / total * 100.
    pub market_breadth: f64,
    pub advance_decline_ratio: Option<f64>,
}

/// Daily treasury yield curve (percent yields).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TreasuryRate {
    pub date: NaiveDate,
    pub month1: Option<f64>,
    pub month3: Option<f64>,
    pub month6: Option<f64>,
    pub year1: Option<f64>,
    pub year2: Option<f64>,
    pub year5: Option<f64>,
    pub year10: Option<f64>,
    pub year20: Option<f64>,
    pub year30: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BondAnalytics {
    pub date: NaiveDate,
    pub year2: Option<f64>,
    pub year10: Option<f64>,
    pub year30: Option<f64>,
    /// 10y minus 2y.
    pub yield_curve_slope: Option<f64>,
    /// 30y minus 10y.
    pub term_spread: Option<f64>,
    pub inverted: Option<bool>,
}

impl BondAnalytics {
    pub fn from_rate(rate: &TreasuryRate) -> Self {
        let slope = rate.year10.zip(rate.year2).map(|(l, s)| l - s);
        Self {
            date: rate.date,
            year2: rate.year2,
            year10: rate.year10,
            year30: rate.year30,
            yield_curve_slope: slope,
            term_spread: rate.year30.zip(rate.year10).map(|(l, s)| l - s),
            inverted: slope.map(|s| s < 0.0),
        }
    }
}
