//! Row counts and time coverage per raw table, plus grouped audit counts.

use super::{Warehouse, WarehouseError};
use chrono::{Duration, NaiveDateTime};
use marketlake_core::domain::InstrumentType;
use rusqlite::params;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableStats {
    pub table: String,
    pub records: u64,
    pub symbols: u64,
    pub earliest: Option<NaiveDateTime>,
    pub latest: Option<NaiveDateTime>,
}

/// Count of rows sharing a name (job type or check name) and a status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountByStatus {
    pub name: String,
    pub status: String,
    pub count: u64,
}

impl Warehouse {
    fn table_stats(&self, table: &str, loaded_since: Option<NaiveDateTime>) -> Result<TableStats, WarehouseError> {
        let (records, symbols, earliest, latest): (i64, i64, Option<NaiveDateTime>, Option<NaiveDateTime>) =
            self.conn.query_row(
                &format!(
                    "SELECT COUNT(*), COUNT(DISTINCT symbol), MIN(datetime), MAX(datetime) FROM {table}
                     WHERE ?1 IS NULL OR loaded_at >= ?1"
                ),
                params![loaded_since],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;
        Ok(TableStats {
            table: table.to_string(),
            records: records as u64,
            symbols: symbols as u64,
            earliest,
            latest,
        })
    }

    /// Per raw table: rows loaded within the last `hours_back` hours.
    /// `now` is UTC, like `loaded_at`.
    pub fn load_statistics(&self, hours_back: i64, now: NaiveDateTime) -> Result<Vec<TableStats>, WarehouseError> {
        let since = now - Duration::hours(hours_back);
        InstrumentType::ALL
            .iter()
            .map(|kind| self.table_stats(kind.raw_table(), Some(since)))
            .collect()
    }

    /// Per raw table: all rows.
    pub fn table_summaries(&self) -> Result<Vec<TableStats>, WarehouseError> {
        InstrumentType::ALL
            .iter()
            .map(|kind| self.table_stats(kind.raw_table(), None))
            .collect()
    }

    pub fn job_counts_since(&self, since: NaiveDateTime) -> Result<Vec<CountByStatus>, WarehouseError> {
        self.grouped_counts(
            "SELECT job_type, status, COUNT(*) FROM elt_job_log WHERE start_time >= ?1
             GROUP BY job_type, status ORDER BY job_type, status",
            since,
        )
    }

    pub fn quality_counts_since(&self, since: NaiveDateTime) -> Result<Vec<CountByStatus>, WarehouseError> {
        self.grouped_counts(
            "SELECT check_name, status, COUNT(*) FROM data_quality_log WHERE run_at >= ?1
             GROUP BY check_name, status ORDER BY check_name, status",
            since,
        )
    }

    fn grouped_counts(&self, sql: &str, since: NaiveDateTime) -> Result<Vec<CountByStatus>, WarehouseError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows: Vec<CountByStatus> = stmt
            .query_map([since], |row| {
                Ok(CountByStatus {
                    name: row.get(0)?,
                    status: row.get(1)?,
                    count: row.get::<_, i64>(2)? as u64,
                })
            })?
            .collect::<Result<_, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::test_support::{series, ts};
    use chrono::NaiveDate;
    use marketlake_core::domain::{JobStatus, JobType};

    #[test]
    fn empty_tables_report_zero() {
        let wh = Warehouse::open_in_memory().unwrap();
        let stats = wh.table_summaries().unwrap();
        assert_eq!(stats.len(), 3);
        assert!(stats.iter().all(|s| s.records == 0 && s.latest.is_none()));
    }

    #[test]
    fn summaries_cover_loaded_rows() {
        let mut wh = Warehouse::open_in_memory().unwrap();
        let mut bars = series("AAPL", ts(2, 9, 30), 4);
        bars.extend(series("MSFT", ts(2, 9, 30), 2));
        wh.merge_batch("b1", &bars, &[]).unwrap();

        let stock = &wh.table_summaries().unwrap()[0];
        assert_eq!(stock.table, "stock_data_raw");
        assert_eq!(stock.records, 6);
        assert_eq!(stock.symbols, 2);
        assert_eq!(stock.earliest, Some(ts(2, 9, 30)));
        assert_eq!(stock.latest, Some(ts(2, 10, 15)));

        // loaded_at is the wall clock, always after a 2024 cutoff
        let recent = wh.load_statistics(1, ts(2, 0, 0)).unwrap();
        assert_eq!(recent[0].records, 6);
        let far_future = NaiveDate::from_ymd_opt(2999, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(wh.load_statistics(1, far_future).unwrap()[0].records, 0);
    }

    #[test]
    fn job_counts_group_by_type_and_status() {
        let mut wh = Warehouse::open_in_memory().unwrap();
        let meta = serde_json::json!({});
        for status in [JobStatus::Completed, JobStatus::Completed, JobStatus::Failed] {
            let id = wh.start_job(JobType::Load, ts(2, 9, 30), &meta).unwrap();
            wh.finish_job(id, ts(2, 9, 31), status, 0, None, &meta).unwrap();
        }
        let counts = wh.job_counts_since(ts(1, 0, 0)).unwrap();
        assert_eq!(
            counts,
            vec![
                CountByStatus { name: "load".into(), status: "completed".into(), count: 2 },
                CountByStatus { name: "load".into(), status: "failed".into(), count: 1 },
            ]
        );
    }
}
