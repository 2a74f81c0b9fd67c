//! Analytics-layer writes and reads. All writes are keyed upserts, so a
//! transform pass over an unchanged window rewrites identical rows.

use super::{round_to, Warehouse, WarehouseError};
use chrono::{NaiveDate, NaiveDateTime};
use marketlake_core::domain::{
    AnalyticsBar, BondAnalytics, DailyAggregate, IndicatorRecord, IndicatorValuesRow, InstrumentType,
    MarketSummary, TimeRange,
};
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;

/// Indicator columns are stored at this precision.
const INDICATOR_DECIMALS: u32 = 6;

fn round_opt(v: Option<f64>, decimals: u32) -> Option<f64> {
    v.map(|x| round_to(x, decimals))
}

impl Warehouse {
    pub fn upsert_analytics_bars(&mut self, bars: &[AnalyticsBar]) -> Result<usize, WarehouseError> {
        let tx = self.conn.transaction()?;
        for kind in InstrumentType::ALL {
            let table = kind.analytics_table();
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT INTO {table} (symbol, datetime, open, high, low, close, volume, price_change,
                    price_change_pct, avg_price, volatility, relative_volume, data_quality_score)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT(symbol, datetime) DO UPDATE SET
                    open = excluded.open, high = excluded.high, low = excluded.low,
                    close = excluded.close, volume = excluded.volume,
                    price_change = excluded.price_change,
                    price_change_pct = excluded.price_change_pct,
                    avg_price = excluded.avg_price,
                    volatility = excluded.volatility,
                    relative_volume = excluded.relative_volume,
                    data_quality_score = excluded.data_quality_score,
                    transformed_at = datetime('now')"
            ))?;
            let d = kind.price_decimals();
            for b in bars.iter().filter(|b| b.instrument_type == kind) {
                stmt.execute(params![
                    b.symbol,
                    b.timestamp,
                    round_to(b.open, d),
                    round_to(b.high, d),
                    round_to(b.low, d),
                    round_to(b.close, d),
                    b.volume,
                    round_opt(b.price_change, d),
                    round_opt(b.price_change_pct, 4),
                    round_to(b.avg_price, d),
                    round_to(b.volatility, 4),
                    round_opt(b.relative_volume, 4),
                    b.data_quality_score,
                ])?;
            }
        }
        tx.commit()?;
        Ok(bars.len())
    }

    pub fn upsert_indicators(&mut self, records: &[IndicatorRecord]) -> Result<usize, WarehouseError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO technical_indicators (symbol, table_type, datetime,
                    sma_20, sma_50, sma_200, ema_12, ema_26, macd, macd_signal, macd_histogram, rsi_14,
                    bb_upper, bb_mid, bb_lower, bb_width, bb_position, volume_sma_20, volume_ratio,
                    price_change_1d, price_change_5d, price_change_20d, volatility_20d)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                    ?18, ?19, ?20, ?21, ?22, ?23)",
            )?;
            for r in records {
                let v = &r.values;
                let c = |x: Option<f64>| round_opt(x, INDICATOR_DECIMALS);
                stmt.execute(params![
                    r.symbol,
                    r.table_type.table_type(),
                    r.timestamp,
                    c(v.sma_20),
                    c(v.sma_50),
                    c(v.sma_200),
                    c(v.ema_12),
                    c(v.ema_26),
                    c(v.macd),
                    c(v.macd_signal),
                    c(v.macd_histogram),
                    c(v.rsi_14),
                    c(v.bb_upper),
                    c(v.bb_mid),
                    c(v.bb_lower),
                    c(v.bb_width),
                    c(v.bb_position),
                    c(v.volume_sma_20),
                    c(v.volume_ratio),
                    c(v.price_change_1d),
                    c(v.price_change_5d),
                    c(v.price_change_20d),
                    c(v.volatility_20d),
                ])?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    pub fn indicators(
        &self,
        kind: InstrumentType,
        symbol: &str,
        range: TimeRange,
    ) -> Result<Vec<IndicatorRecord>, WarehouseError> {
        let mut stmt = self.conn.prepare(
            "SELECT datetime, sma_20, sma_50, sma_200, ema_12, ema_26, macd, macd_signal, macd_histogram,
                rsi_14, bb_upper, bb_mid, bb_lower, bb_width, bb_position, volume_sma_20, volume_ratio,
                price_change_1d, price_change_5d, price_change_20d, volatility_20d
             FROM technical_indicators
             WHERE symbol = ?1 AND table_type = ?2 AND datetime >= ?3 AND datetime <= ?4
             ORDER BY datetime",
        )?;
        let records: Vec<IndicatorRecord> = stmt
            .query_map(
                params![symbol, kind.table_type(), range.start, range.end],
                |row| {
                    Ok(IndicatorRecord {
                        symbol: symbol.to_string(),
                        table_type: kind,
                        timestamp: row.get(0)?,
                        values: IndicatorValuesRow {
                            sma_20: row.get(1)?,
                            sma_50: row.get(2)?,
                            sma_200: row.get(3)?,
                            ema_12: row.get(4)?,
                            ema_26: row.get(5)?,
                            macd: row.get(6)?,
                            macd_signal: row.get(7)?,
                            macd_histogram: row.get(8)?,
                            rsi_14: row.get(9)?,
                            bb_upper: row.get(10)?,
                            bb_mid: row.get(11)?,
                            bb_lower: row.get(12)?,
                            bb_width: row.get(13)?,
                            bb_position: row.get(14)?,
                            volume_sma_20: row.get(15)?,
                            volume_ratio: row.get(16)?,
                            price_change_1d: row.get(17)?,
                            price_change_5d: row.get(18)?,
                            price_change_20d: row.get(19)?,
                            volatility_20d: row.get(20)?,
                        },
                    })
                },
            )?
            .collect::<Result<_, _>>()?;
        Ok(records)
    }

    pub fn upsert_daily_aggregates(&mut self, aggregates: &[DailyAggregate]) -> Result<usize, WarehouseError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO daily_aggregates
                    (symbol, table_type, date, open, high, low, close, volume, vwap, bar_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for a in aggregates {
                let d = a.table_type.price_decimals();
                stmt.execute(params![
                    a.symbol,
                    a.table_type.table_type(),
                    a.date,
                    round_to(a.open, d),
                    round_to(a.high, d),
                    round_to(a.low, d),
                    round_to(a.close, d),
                    a.volume,
                    round_opt(a.vwap, 4),
                    a.bar_count as i64,
                ])?;
            }
        }
        tx.commit()?;
        Ok(aggregates.len())
    }

    pub fn daily_aggregates(&self, kind: InstrumentType, date: NaiveDate) -> Result<Vec<DailyAggregate>, WarehouseError> {
        self.daily_aggregates_between(kind, date, date)
    }

    /// Aggregates for `kind` with `start <= date <= end`, by symbol then date.
    pub fn daily_aggregates_between(
        &self,
        kind: InstrumentType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyAggregate>, WarehouseError> {
        let mut stmt = self.conn.prepare(
            "SELECT symbol, date, open, high, low, close, volume, vwap, bar_count FROM daily_aggregates
             WHERE table_type = ?1 AND date >= ?2 AND date <= ?3 ORDER BY symbol, date",
        )?;
        let rows: Vec<DailyAggregate> = stmt
            .query_map(params![kind.table_type(), start, end], |row| {
                Ok(DailyAggregate {
                    symbol: row.get(0)?,
                    table_type: kind,
                    date: row.get(1)?,
                    open: row.get(2)?,
                    high: row.get(3)?,
                    low: row.get(4)?,
                    close: row.get(5)?,
                    volume: row.get(6)?,
                    vwap: row.get(7)?,
                    bar_count: row.get::<_, i64>(8)? as usize,
                })
            })?
            .collect::<Result<_, _>>()?;
        Ok(rows)
    }

    /// Close of each symbol's latest aggregate strictly before `date`.
    pub fn previous_closes(&self, kind: InstrumentType, date: NaiveDate) -> Result<HashMap<String, f64>, WarehouseError> {
        let mut stmt = self.conn.prepare(
            "SELECT d.symbol, d.close FROM daily_aggregates d
             WHERE d.table_type = ?1 AND d.date = (
                SELECT MAX(p.date) FROM daily_aggregates p
                WHERE p.symbol = d.symbol AND p.table_type = d.table_type AND p.date < ?2
             )",
        )?;
        let closes: HashMap<String, f64> = stmt
            .query_map(params![kind.table_type(), date], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<_, _>>()?;
        Ok(closes)
    }

    pub fn upsert_market_summary(&mut self, s: &MarketSummary) -> Result<(), WarehouseError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO market_summary (date, market, total_symbols, avg_volume, total_volume,
                up_volume, down_volume, avg_price_change, top_gainers, top_losers, advancing, declining,
                unchanged, market_breadth, advance_decline_ratio)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                s.date,
                s.market.table_type(),
                s.total_symbols as i64,
                round_to(s.avg_volume, 2),
                s.total_volume,
                s.up_volume,
                s.down_volume,
                round_to(s.avg_price_change, 4),
                serde_json::to_string(&s.top_gainers)?,
                serde_json::to_string(&s.top_losers)?,
                s.advancing as i64,
                s.declining as i64,
                s.unchanged as i64,
                round_to(s.market_breadth, 4),
                round_opt(s.advance_decline_ratio, 4),
            ],
        )?;
        Ok(())
    }

    pub fn market_summary(&self, date: NaiveDate, market: InstrumentType) -> Result<Option<MarketSummary>, WarehouseError> {
        let row = self
            .conn
            .query_row(
                "SELECT total_symbols, avg_volume, total_volume, up_volume, down_volume, avg_price_change,
                    top_gainers, top_losers, advancing, declining, unchanged, market_breadth,
                    advance_decline_ratio
                 FROM market_summary WHERE date = ?1 AND market = ?2",
                params![date, market.table_type()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, f64>(1)?,
                        [row.get::<_, i64>(2)?, row.get::<_, i64>(3)?, row.get::<_, i64>(4)?],
                        row.get::<_, f64>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                        [row.get::<_, i64>(8)?, row.get::<_, i64>(9)?, row.get::<_, i64>(10)?],
                        row.get::<_, f64>(11)?,
                        row.get::<_, Option<f64>>(12)?,
                    ))
                },
            )
            .optional()?;
        let Some((total, avg_volume, volumes, avg_change, gainers, losers, counts, breadth, ratio)) = row else {
            return Ok(None);
        };
        Ok(Some(MarketSummary {
            date,
            market,
            total_symbols: total as usize,
            avg_volume,
            total_volume: volumes[0],
            up_volume: volumes[1],
            down_volume: volumes[2],
            avg_price_change: avg_change,
            top_gainers: serde_json::from_str(&gainers)?,
            top_losers: serde_json::from_str(&losers)?,
            advancing: counts[0] as usize,
            declining: counts[1] as usize,
            unchanged: counts[2] as usize,
            market_breadth: breadth,
            advance_decline_ratio: ratio,
        }))
    }

    pub fn upsert_bond_analytics(&mut self, rows: &[BondAnalytics]) -> Result<usize, WarehouseError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO bond_data
                    (date, year2, year10, year30, yield_curve_slope, term_spread, inverted)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for b in rows {
                stmt.execute(params![
                    b.date,
                    b.year2,
                    b.year10,
                    b.year30,
                    round_opt(b.yield_curve_slope, 4),
                    round_opt(b.term_spread, 4),
                    b.inverted,
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    pub fn bond_analytics(&self, date: NaiveDate) -> Result<Option<BondAnalytics>, WarehouseError> {
        let row = self
            .conn
            .query_row(
                "SELECT year2, year10, year30, yield_curve_slope, term_spread, inverted
                 FROM bond_data WHERE date = ?1",
                [date],
                |row| {
                    Ok(BondAnalytics {
                        date,
                        year2: row.get(0)?,
                        year10: row.get(1)?,
                        year30: row.get(2)?,
                        yield_curve_slope: row.get(3)?,
                        term_spread: row.get(4)?,
                        inverted: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Raw bars in `range` lacking an analytics row or an indicator row.
    pub fn untransformed_bars(
        &self,
        kind: InstrumentType,
        range: TimeRange,
    ) -> Result<Vec<(String, NaiveDateTime)>, WarehouseError> {
        let raw = kind.raw_table();
        let analytics = kind.analytics_table();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT r.symbol, r.datetime FROM {raw} r
             LEFT JOIN {analytics} a ON a.symbol = r.symbol AND a.datetime = r.datetime
             LEFT JOIN technical_indicators t
                ON t.symbol = r.symbol AND t.table_type = ?1 AND t.datetime = r.datetime
             WHERE r.datetime >= ?2 AND r.datetime <= ?3 AND (a.id IS NULL OR t.symbol IS NULL)
             ORDER BY r.symbol, r.datetime"
        ))?;
        let rows: Vec<(String, NaiveDateTime)> = stmt
            .query_map(params![kind.table_type(), range.start, range.end], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<Result<_, _>>()?;
        Ok(rows)
    }

    pub fn analytics_rows(&self, kind: InstrumentType) -> Result<usize, WarehouseError> {
        let table = kind.analytics_table();
        Ok(self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?)
    }
}
