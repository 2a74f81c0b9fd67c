//! Staging, merge into the raw tables, and raw reads.

use super::{round_to, Warehouse, WarehouseError};
use chrono::{Duration, NaiveDateTime};
use marketlake_core::domain::{Bar, InstrumentType, TimeRange, TreasuryRate};
use rusqlite::{params, Row, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A bar refused by the loader, as stored in `load_rejections`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadRejection {
    pub symbol: String,
    pub table_type: InstrumentType,
    pub timestamp: Option<NaiveDateTime>,
    pub reason: String,
    pub detail: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeCounts {
    pub inserted: usize,
    pub updated: usize,
}

fn bar_from_row(kind: InstrumentType) -> impl Fn(&Row<'_>) -> rusqlite::Result<Bar> {
    move |row| {
        Ok(Bar {
            symbol: row.get(0)?,
            instrument_type: kind,
            timestamp: row.get(1)?,
            open: row.get(2)?,
            high: row.get(3)?,
            low: row.get(4)?,
            close: row.get(5)?,
            volume: row.get(6)?,
        })
    }
}

fn stage(tx: &Transaction<'_>, batch_id: &str, bars: &[Bar]) -> rusqlite::Result<()> {
    let mut stmt = tx.prepare_cached(
        "INSERT INTO bar_staging (batch_id, table_type, symbol, datetime, open, high, low, close, volume)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    for bar in bars {
        let d = bar.instrument_type.price_decimals();
        stmt.execute(params![
            batch_id,
            bar.instrument_type.table_type(),
            bar.symbol,
            bar.timestamp,
            round_to(bar.open, d),
            round_to(bar.high, d),
            round_to(bar.low, d),
            round_to(bar.close, d),
            bar.volume,
        ])?;
    }
    Ok(())
}

fn merge_kind(tx: &Transaction<'_>, batch_id: &str, kind: InstrumentType) -> rusqlite::Result<MergeCounts> {
    let raw = kind.raw_table();
    let staged: usize = tx.query_row(
        "SELECT COUNT(*) FROM bar_staging WHERE batch_id = ?1 AND table_type = ?2",
        params![batch_id, kind.table_type()],
        |row| row.get(0),
    )?;
    if staged == 0 {
        return Ok(MergeCounts::default());
    }
    let updated: usize = tx.query_row(
        &format!(
            "SELECT COUNT(*) FROM bar_staging s
             JOIN {raw} r ON r.symbol = s.symbol AND r.datetime = s.datetime
             WHERE s.batch_id = ?1 AND s.table_type = ?2"
        ),
        params![batch_id, kind.table_type()],
        |row| row.get(0),
    )?;
    tx.execute(
        &format!(
            "INSERT INTO {raw} (symbol, datetime, open, high, low, close, volume, batch_id)
             SELECT symbol, datetime, open, high, low, close, volume, batch_id
             FROM bar_staging WHERE batch_id = ?1 AND table_type = ?2
             ON CONFLICT(symbol, datetime) DO UPDATE SET
                open = excluded.open,
                high = excluded.high,
                low = excluded.low,
                close = excluded.close,
                volume = excluded.volume,
                batch_id = excluded.batch_id,
                updated_at = datetime('now')"
        ),
        params![batch_id, kind.table_type()],
    )?;
    Ok(MergeCounts {
        inserted: staged - updated,
        updated,
    })
}

fn record_rejections(tx: &Transaction<'_>, batch_id: &str, rejections: &[LoadRejection]) -> Result<(), WarehouseError> {
    let mut stmt = tx.prepare_cached(
        "INSERT INTO load_rejections (batch_id, table_type, symbol, datetime, reason, detail)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for r in rejections {
        stmt.execute(params![
            batch_id,
            r.table_type.table_type(),
            r.symbol,
            r.timestamp,
            r.reason,
            serde_json::to_string(&r.detail)?,
        ])?;
    }
    Ok(())
}

impl Warehouse {
    /// Stage `bars`, merge them into their raw tables by (symbol, datetime),
    /// clear the staging rows and record `rejections`, all in one
    /// transaction. `bars` must be validated and free of duplicate keys.
    pub fn merge_batch(
        &mut self,
        batch_id: &str,
        bars: &[Bar],
        rejections: &[LoadRejection],
    ) -> Result<MergeCounts, WarehouseError> {
        let tx = self.conn.transaction()?;
        stage(&tx, batch_id, bars)?;
        let mut counts = MergeCounts::default();
        for kind in InstrumentType::ALL {
            let c = merge_kind(&tx, batch_id, kind)?;
            counts.inserted += c.inserted;
            counts.updated += c.updated;
        }
        tx.execute("DELETE FROM bar_staging WHERE batch_id = ?1", [batch_id])?;
        record_rejections(&tx, batch_id, rejections)?;
        tx.commit()?;
        Ok(counts)
    }

    /// Upsert treasury curves by date.
    pub fn upsert_rates(&mut self, rates: &[TreasuryRate]) -> Result<MergeCounts, WarehouseError> {
        let tx = self.conn.transaction()?;
        let mut counts = MergeCounts::default();
        {
            let mut exists = tx.prepare_cached("SELECT EXISTS(SELECT 1 FROM bond_data_raw WHERE date = ?1)")?;
            let mut upsert = tx.prepare_cached(
                "INSERT INTO bond_data_raw (date, month1, month3, month6, year1, year2, year5, year10, year20, year30)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(date) DO UPDATE SET
                    month1 = excluded.month1, month3 = excluded.month3, month6 = excluded.month6,
                    year1 = excluded.year1, year2 = excluded.year2, year5 = excluded.year5,
                    year10 = excluded.year10, year20 = excluded.year20, year30 = excluded.year30,
                    loaded_at = datetime('now')",
            )?;
            for r in rates {
                let existed: bool = exists.query_row([r.date], |row| row.get(0))?;
                let round = |v: Option<f64>| v.map(|y| round_to(y, 4));
                upsert.execute(params![
                    r.date,
                    round(r.month1),
                    round(r.month3),
                    round(r.month6),
                    round(r.year1),
                    round(r.year2),
                    round(r.year5),
                    round(r.year10),
                    round(r.year20),
                    round(r.year30),
                ])?;
                if existed {
                    counts.updated += 1;
                } else {
                    counts.inserted += 1;
                }
            }
        }
        tx.commit()?;
        Ok(counts)
    }

    /// Raw bars for one symbol: up to `lookback` bars before `range.start`
    /// followed by every bar inside `range`, oldest first.
    pub fn bars_with_lookback(
        &self,
        kind: InstrumentType,
        symbol: &str,
        range: TimeRange,
        lookback: usize,
    ) -> Result<Vec<Bar>, WarehouseError> {
        let raw = kind.raw_table();
        let mut history: Vec<Bar> = self
            .conn
            .prepare_cached(&format!(
                "SELECT symbol, datetime, open, high, low, close, volume FROM {raw}
                 WHERE symbol = ?1 AND datetime < ?2 ORDER BY datetime DESC LIMIT ?3"
            ))?
            .query_map(params![symbol, range.start, lookback as i64], bar_from_row(kind))?
            .collect::<Result<_, _>>()?;
        history.reverse();
        let current: Vec<Bar> = self
            .conn
            .prepare_cached(&format!(
                "SELECT symbol, datetime, open, high, low, close, volume FROM {raw}
                 WHERE symbol = ?1 AND datetime >= ?2 AND datetime <= ?3 ORDER BY datetime"
            ))?
            .query_map(params![symbol, range.start, range.end], bar_from_row(kind))?
            .collect::<Result<_, _>>()?;
        history.extend(current);
        Ok(history)
    }

    /// Bars of all symbols of `kind` inside `range`, by symbol then time.
    pub fn raw_bars(&self, kind: InstrumentType, range: TimeRange) -> Result<Vec<Bar>, WarehouseError> {
        let raw = kind.raw_table();
        let bars: Vec<Bar> = self
            .conn
            .prepare(&format!(
                "SELECT symbol, datetime, open, high, low, close, volume FROM {raw}
                 WHERE datetime >= ?1 AND datetime <= ?2 ORDER BY symbol, datetime"
            ))?
            .query_map(params![range.start, range.end], bar_from_row(kind))?
            .collect::<Result<_, _>>()?;
        Ok(bars)
    }

    pub fn symbols_in_range(&self, kind: InstrumentType, range: TimeRange) -> Result<Vec<String>, WarehouseError> {
        let raw = kind.raw_table();
        let symbols: Vec<String> = self
            .conn
            .prepare(&format!(
                "SELECT DISTINCT symbol FROM {raw} WHERE datetime >= ?1 AND datetime <= ?2 ORDER BY symbol"
            ))?
            .query_map(params![range.start, range.end], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        Ok(symbols)
    }

    /// Most recent bar timestamp per symbol.
    pub fn latest_timestamps(&self, kind: InstrumentType) -> Result<HashMap<String, NaiveDateTime>, WarehouseError> {
        let raw = kind.raw_table();
        let latest: HashMap<String, NaiveDateTime> = self
            .conn
            .prepare(&format!("SELECT symbol, MAX(datetime) FROM {raw} GROUP BY symbol"))?
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<_, _>>()?;
        Ok(latest)
    }

    /// Per-symbol volumes of bars in `[start, end)`, used as the trailing
    /// baseline by the volume check.
    pub fn volumes_between(
        &self,
        kind: InstrumentType,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<HashMap<String, Vec<i64>>, WarehouseError> {
        let raw = kind.raw_table();
        let mut out: HashMap<String, Vec<i64>> = HashMap::new();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT symbol, volume FROM {raw} WHERE datetime >= ?1 AND datetime < ?2 ORDER BY symbol, datetime"
        ))?;
        let rows = stmt.query_map(params![start, end], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (symbol, volume) = row?;
            out.entry(symbol).or_default().push(volume);
        }
        Ok(out)
    }

    pub fn rates_between(&self, range: TimeRange) -> Result<Vec<TreasuryRate>, WarehouseError> {
        let rates: Vec<TreasuryRate> = self
            .conn
            .prepare(
                "SELECT date, month1, month3, month6, year1, year2, year5, year10, year20, year30
                 FROM bond_data_raw WHERE date >= ?1 AND date <= ?2 ORDER BY date",
            )?
            .query_map(params![range.start.date(), range.end.date()], |row| {
                Ok(TreasuryRate {
                    date: row.get(0)?,
                    month1: row.get(1)?,
                    month3: row.get(2)?,
                    month6: row.get(3)?,
                    year1: row.get(4)?,
                    year2: row.get(5)?,
                    year5: row.get(6)?,
                    year10: row.get(7)?,
                    year20: row.get(8)?,
                    year30: row.get(9)?,
                })
            })?
            .collect::<Result<_, _>>()?;
        Ok(rates)
    }

    pub fn rejections(&self, batch_id: &str) -> Result<Vec<LoadRejection>, WarehouseError> {
        let mut stmt = self.conn.prepare(
            "SELECT symbol, table_type, datetime, reason, detail FROM load_rejections
             WHERE batch_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([batch_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<NaiveDateTime>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (symbol, table_type, timestamp, reason, detail) = row?;
            out.push(LoadRejection {
                symbol,
                table_type: InstrumentType::parse(&table_type).unwrap_or(InstrumentType::Stock),
                timestamp,
                reason,
                detail: serde_json::from_str(&detail)?,
            });
        }
        Ok(out)
    }

    pub fn staging_rows(&self) -> Result<usize, WarehouseError> {
        Ok(self.conn.query_row("SELECT COUNT(*) FROM bar_staging", [], |row| row.get(0))?)
    }

    /// Delete staging rows older than `max_age_days`, left behind by loads
    /// that died mid-batch. `now` is UTC, like `staged_at`.
    pub fn cleanup_staging(&mut self, max_age_days: i64, now: NaiveDateTime) -> Result<usize, WarehouseError> {
        let cutoff = now - Duration::days(max_age_days);
        let deleted = self
            .conn
            .execute("DELETE FROM bar_staging WHERE staged_at < ?1", [cutoff])?;
        Ok(deleted)
    }
}
