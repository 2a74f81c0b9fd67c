//! Bar: the fundamental market data unit.

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Instrument family. Selects the raw and analytics tables a bar lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentType {
    Stock,
    Index,
    Commodity,
}

impl InstrumentType {
    pub const ALL: [InstrumentType; 3] = [Self::Stock, Self::Index, Self::Commodity];

    /// Value stored in the `table_type` column.
    pub fn table_type(self) -> &'static str {
        match self {
            Self::Stock => "stock",
            Self::Index => "index",
            Self::Commodity => "commodity",
        }
    }

    pub fn raw_table(self) -> &'static str {
        match self {
            Self::Stock => "stock_data_raw",
            Self::Index => "index_data_raw",
            Self::Commodity => "commodity_data_raw",
        }
    }

    pub fn analytics_table(self) -> &'static str {
        match self {
            Self::Stock => "stock_data",
            Self::Index => "index_data",
            Self::Commodity => "commodity_data",
        }
    }

    /// Decimal places kept when prices are written to the warehouse.
    pub fn price_decimals(self) -> u32 {
        match self {
            Self::Stock => 2,
            Self::Index | Self::Commodity => 4,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stock" | "stocks" => Some(Self::Stock),
            "index" | "indexes" => Some(Self::Index),
            "commodity" | "commodities" => Some(Self::Commodity),
            _ => None,
        }
    }
}

impl fmt::Display for InstrumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_type())
    }
}

/// Why a bar was refused by validation.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BarRejection {
    #[error("invalid symbol '{symbol}'")]
    InvalidSymbol { symbol: String },

    #[error("non-finite {field}")]
    NonFinite { field: String },

    #[error("non-positive {field}: {value}")]
    NonPositivePrice { field: String, value: f64 },

    #[error("high {high} below {field} {value}")]
    HighBelow { field: String, high: f64, value: f64 },

    #[error("low {low} above {field} {value}")]
    LowAbove { field: String, low: f64, value: f64 },

    #[error("negative volume: {volume}")]
    NegativeVolume { volume: i64 },

    #[error("timestamp {timestamp} not aligned to {interval_minutes}-minute bars")]
    Misaligned {
        timestamp: NaiveDateTime,
        interval_minutes: u32,
    },
}

/// OHLCV bar for one symbol over one bar interval.
///
/// `timestamp` is the exchange-local start of the interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub instrument_type: InstrumentType,
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl Bar {
    /// Build a bar and validate it against the price/volume invariants.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        instrument_type: InstrumentType,
        timestamp: NaiveDateTime,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: i64,
    ) -> Result<Self, BarRejection> {
        let bar = Self {
            symbol: symbol.into(),
            instrument_type,
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        };
        bar.check_prices()?;
        Ok(bar)
    }

    /// Returns true if any OHLC field is NaN or infinite.
    pub fn is_void(&self) -> bool {
        [self.open, self.high, self.low, self.close]
            .iter()
            .any(|v| !v.is_finite())
    }

    /// Basic OHLCV sanity check: high >= low, high >= open, high >= close, etc.
    pub fn is_sane(&self) -> bool {
        self.check_prices().is_ok()
    }

    /// Full validation: symbol, prices, volume and interval alignment.
    pub fn validate(&self, interval_minutes: u32) -> Result<(), BarRejection> {
        if !crate::data::registry::validate_symbol(&self.symbol) {
            return Err(BarRejection::InvalidSymbol {
                symbol: self.symbol.clone(),
            });
        }
        self.check_prices()?;
        if !is_aligned(self.timestamp, interval_minutes) {
            return Err(BarRejection::Misaligned {
                timestamp: self.timestamp,
                interval_minutes,
            });
        }
        Ok(())
    }

    /// Price and volume checks only, without the symbol or alignment rules.
    pub fn check_prices(&self) -> Result<(), BarRejection> {
        let fields = [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ];
        for (field, value) in fields {
            if !value.is_finite() {
                return Err(BarRejection::NonFinite {
                    field: field.into(),
                });
            }
            if value <= 0.0 {
                return Err(BarRejection::NonPositivePrice {
                    field: field.into(),
                    value,
                });
            }
        }
        for (field, value) in [("open", self.open), ("close", self.close), ("low", self.low)] {
            if self.high < value {
                return Err(BarRejection::HighBelow {
                    field: field.into(),
                    high: self.high,
                    value,
                });
            }
        }
        for (field, value) in [("open", self.open), ("close", self.close)] {
            if self.low > value {
                return Err(BarRejection::LowAbove {
                    field: field.into(),
                    low: self.low,
                    value,
                });
            }
        }
        if self.volume < 0 {
            return Err(BarRejection::NegativeVolume {
                volume: self.volume,
            });
        }
        Ok(())
    }

    /// Typical price (h + l + c) / 3.
    pub fn avg_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}

/// True when `ts` starts a bar of the given interval. Daily bars
/// (1440 minutes) must sit at midnight.
pub fn is_aligned(ts: NaiveDateTime, interval_minutes: u32) -> bool {
    if interval_minutes == 0 || ts.second() != 0 || ts.nanosecond() != 0 {
        return false;
    }
    let minute_of_day = ts.hour() * 60 + ts.minute();
    minute_of_day % interval_minutes == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn sample_bar() -> Bar {
        Bar {
            symbol: "AAPL".into(),
            instrument_type: InstrumentType::Stock,
            timestamp: ts(9, 30),
            open: 100.0,
            high: 105.0,
            low: 98.0,
            close: 103.0,
            volume: 50_000,
        }
    }

    #[test]
    fn bar_is_sane() {
        assert!(sample_bar().is_sane());
        assert!(sample_bar().validate(15).is_ok());
    }

    #[test]
    fn bar_detects_void() {
        let mut bar = sample_bar();
        bar.open = f64::NAN;
        assert!(bar.is_void());
        assert!(matches!(
            bar.validate(15),
            Err(BarRejection::NonFinite { .. })
        ));
    }

    #[test]
    fn high_below_close_rejected() {
        let mut bar = sample_bar();
        bar.high = 102.0;
        let err = bar.validate(15).unwrap_err();
        assert_eq!(
            err,
            BarRejection::HighBelow {
                field: "close".into(),
                high: 102.0,
                value: 103.0
            }
        );
    }

    #[test]
    fn low_above_open_rejected() {
        let mut bar = sample_bar();
        bar.low = 100.5;
        assert!(matches!(
            bar.validate(15),
            Err(BarRejection::LowAbove { .. })
        ));
    }

    #[test]
    fn negative_volume_rejected() {
        let mut bar = sample_bar();
        bar.volume = -1;
        assert_eq!(
            bar.validate(15),
            Err(BarRejection::NegativeVolume { volume: -1 })
        );
    }

    #[test]
    fn zero_price_rejected() {
        let result = Bar::new("AAPL", InstrumentType::Stock, ts(9, 30), 0.0, 1.0, 0.0, 1.0, 10);
        assert!(matches!(
            result,
            Err(BarRejection::NonPositivePrice { .. })
        ));
    }

    #[test]
    fn misaligned_timestamp_rejected() {
        let mut bar = sample_bar();
        bar.timestamp = ts(9, 37);
        assert!(matches!(
            bar.validate(15),
            Err(BarRejection::Misaligned { .. })
        ));
        assert!(bar.validate(1).is_ok());
    }

    #[test]
    fn daily_alignment_requires_midnight() {
        assert!(is_aligned(ts(0, 0), 1440));
        assert!(!is_aligned(ts(9, 30), 1440));
    }

    #[test]
    fn rejection_serializes_with_reason_tag() {
        let json = serde_json::to_value(BarRejection::NegativeVolume { volume: -5 }).unwrap();
        assert_eq!(json["reason"], "negative_volume");
        assert_eq!(json["volume"], -5);
    }

    #[test]
    fn instrument_type_tables() {
        assert_eq!(InstrumentType::Index.raw_table(), "index_data_raw");
        assert_eq!(InstrumentType::Commodity.analytics_table(), "commodity_data");
        assert_eq!(InstrumentType::parse("stocks"), Some(InstrumentType::Stock));
        assert_eq!(InstrumentType::parse("bond"), None);
    }
}
