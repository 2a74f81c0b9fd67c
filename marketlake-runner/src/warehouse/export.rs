//! Wide export query: stock bars joined as-of with yields and reference closes.

use super::{Warehouse, WarehouseError};
use chrono::NaiveDateTime;
use marketlake_core::domain::{InstrumentType, TimeRange};
use rusqlite::ToSql;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRow {
    pub symbol: String,
    pub datetime: NaiveDateTime,
    pub close: f64,
    pub volume: i64,
    /// Yields from the latest curve dated on or before the bar's day.
    pub us2y: Option<f64>,
    pub us5y: Option<f64>,
    pub us10y: Option<f64>,
    /// Latest close at or before `datetime`, in the order the references
    /// were requested. `None` when the symbol has no bar that early.
    pub references: Vec<Option<f64>>,
}

fn latest_yield(column: &str) -> String {
    format!("(SELECT b.{column} FROM bond_data_raw b WHERE b.date <= date(s.datetime) ORDER BY b.date DESC LIMIT 1)")
}

impl Warehouse {
    /// One row per stock bar in `range`, ordered by time then symbol.
    /// `stocks` limits the symbols exported; empty exports every stock.
    pub fn wide_export(
        &self,
        stocks: &[String],
        references: &[(InstrumentType, String)],
        range: TimeRange,
    ) -> Result<Vec<ExportRow>, WarehouseError> {
        let mut columns = vec![
            "s.symbol".to_string(),
            "s.datetime".to_string(),
            "s.close".to_string(),
            "s.volume".to_string(),
            latest_yield("year2"),
            latest_yield("year5"),
            latest_yield("year10"),
        ];
        for (i, (kind, _)) in references.iter().enumerate() {
            columns.push(format!(
                "(SELECT r.close FROM {table} r WHERE r.symbol = ?{param} AND r.datetime <= s.datetime
                  ORDER BY r.datetime DESC LIMIT 1)",
                table = kind.raw_table(),
                param = i + 3,
            ));
        }
        let sql = format!(
            "SELECT {} FROM {} s WHERE s.datetime >= ?1 AND s.datetime <= ?2 ORDER BY s.datetime, s.symbol",
            columns.join(", "),
            InstrumentType::Stock.raw_table(),
        );

        let mut args: Vec<&dyn ToSql> = vec![&range.start, &range.end];
        args.extend(references.iter().map(|(_, symbol)| symbol as &dyn ToSql));

        let fixed = 7;
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(args.as_slice(), |row| {
            Ok(ExportRow {
                symbol: row.get(0)?,
                datetime: row.get(1)?,
                close: row.get(2)?,
                volume: row.get(3)?,
                us2y: row.get(4)?,
                us5y: row.get(5)?,
                us10y: row.get(6)?,
                references: (0..references.len())
                    .map(|i| row.get(fixed + i))
                    .collect::<Result<_, _>>()?,
            })
        })?;

        let mut exported = Vec::new();
        for row in rows {
            let row = row?;
            if stocks.is_empty() || stocks.contains(&row.symbol) {
                exported.push(row);
            }
        }
        Ok(exported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::test_support::{bar, ts};
    use chrono::NaiveDate;
    use marketlake_core::domain::{Bar, TreasuryRate};

    fn reference(symbol: &str, kind: InstrumentType, hour: u32, minute: u32, close: f64) -> Bar {
        let mut b = bar(symbol, ts(2, hour, minute), close);
        b.instrument_type = kind;
        b
    }

    fn curve(day: u32, year2: f64, year10: f64) -> TreasuryRate {
        TreasuryRate {
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            year2: Some(year2),
            year5: Some((year2 + year10) / 2.0),
            year10: Some(year10),
            ..Default::default()
        }
    }

    fn warehouse() -> Warehouse {
        let mut wh = Warehouse::open_in_memory().unwrap();
        wh.merge_batch(
            "b",
            &[
                bar("AAPL", ts(2, 9, 30), 187.0),
                bar("AAPL", ts(2, 9, 45), 188.0),
                bar("MSFT", ts(2, 9, 45), 370.0),
                reference("^GSPC", InstrumentType::Index, 9, 30, 4700.0),
                reference("GCUSD", InstrumentType::Commodity, 9, 45, 2050.0),
            ],
            &[],
        )
        .unwrap();
        wh.upsert_rates(&[curve(1, 4.25, 3.90)]).unwrap();
        wh
    }

    fn references() -> Vec<(InstrumentType, String)> {
        vec![
            (InstrumentType::Index, "^GSPC".to_string()),
            (InstrumentType::Commodity, "GCUSD".to_string()),
        ]
    }

    #[test]
    fn joins_latest_values_at_or_before_each_bar() {
        let wh = warehouse();
        let rows = wh
            .wide_export(&[], &references(), TimeRange::day(ts(2, 0, 0).date()))
            .unwrap();

        let keys: Vec<(&str, NaiveDateTime)> = rows.iter().map(|r| (r.symbol.as_str(), r.datetime)).collect();
        assert_eq!(keys, vec![("AAPL", ts(2, 9, 30)), ("AAPL", ts(2, 9, 45)), ("MSFT", ts(2, 9, 45))]);
        // the 2024-01-01 curve is the latest on 2024-01-02
        assert!(rows.iter().all(|r| r.us2y == Some(4.25) && r.us10y == Some(3.90)));
        // gold has no bar before 09:45
        assert_eq!(rows[0].references, vec![Some(4700.0), None]);
        assert_eq!(rows[1].references, vec![Some(4700.0), Some(2050.0)]);
    }

    #[test]
    fn stock_filter_and_missing_curve() {
        let mut wh = Warehouse::open_in_memory().unwrap();
        wh.merge_batch("b", &[bar("AAPL", ts(2, 9, 30), 187.0), bar("MSFT", ts(2, 9, 30), 370.0)], &[])
            .unwrap();
        // a curve dated after the bars never applies
        wh.upsert_rates(&[curve(3, 4.30, 3.95)]).unwrap();
        let rows = wh
            .wide_export(&["MSFT".to_string()], &[], TimeRange::day(ts(2, 0, 0).date()))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol, "MSFT");
        assert_eq!((rows[0].us2y, rows[0].us5y, rows[0].us10y), (None, None, None));
        assert!(rows[0].references.is_empty());
    }
}
