//! Job log and quality log. Both are append-only; a job row is updated
//! exactly once, from `running` to its final status.

use super::{Warehouse, WarehouseError};
use chrono::NaiveDateTime;
use marketlake_core::domain::{JobLogEntry, JobStatus, JobType, QualityCheckResult, QualityStatus};
use rusqlite::{params, OptionalExtension, Row};

type JobRow = (i64, String, NaiveDateTime, Option<NaiveDateTime>, String, i64, Option<String>, String);

fn job_row(row: &Row<'_>) -> rusqlite::Result<JobRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn job_entry(row: JobRow) -> Result<JobLogEntry, WarehouseError> {
    let (job_id, job_type, start_time, end_time, status, records, error_message, metadata) = row;
    Ok(JobLogEntry {
        job_id,
        job_type,
        start_time,
        end_time,
        status: JobStatus::parse(&status).unwrap_or(JobStatus::Failed),
        records_processed: records.max(0) as u64,
        error_message,
        metadata: serde_json::from_str(&metadata)?,
    })
}

const JOB_COLUMNS: &str =
    "job_id, job_type, start_time, end_time, status, records_processed, error_message, metadata";

impl Warehouse {
    /// Insert a `running` entry and return its id.
    pub fn start_job(
        &mut self,
        job_type: JobType,
        start_time: NaiveDateTime,
        metadata: &serde_json::Value,
    ) -> Result<i64, WarehouseError> {
        self.conn.execute(
            "INSERT INTO elt_job_log (job_type, start_time, status, metadata) VALUES (?1, ?2, 'running', ?3)",
            params![job_type.as_str(), start_time, serde_json::to_string(metadata)?],
        )?;
        let job_id = self.conn.last_insert_rowid();
        tracing::debug!(job_id, job_type = %job_type, "job started");
        Ok(job_id)
    }

    /// Close a running entry. Returns false if it was already closed.
    pub fn finish_job(
        &mut self,
        job_id: i64,
        end_time: NaiveDateTime,
        status: JobStatus,
        records_processed: u64,
        error_message: Option<&str>,
        metadata: &serde_json::Value,
    ) -> Result<bool, WarehouseError> {
        let changed = self.conn.execute(
            "UPDATE elt_job_log
             SET end_time = ?2, status = ?3, records_processed = ?4, error_message = ?5, metadata = ?6
             WHERE job_id = ?1 AND status = 'running'",
            params![
                job_id,
                end_time,
                status.as_str(),
                records_processed as i64,
                error_message,
                serde_json::to_string(metadata)?,
            ],
        )?;
        Ok(changed == 1)
    }

    pub fn job(&self, job_id: i64) -> Result<Option<JobLogEntry>, WarehouseError> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM elt_job_log WHERE job_id = ?1"),
                [job_id],
                job_row,
            )
            .optional()?;
        row.map(job_entry).transpose()
    }

    /// Entries started at or after `since`, oldest first.
    pub fn jobs_since(&self, since: NaiveDateTime) -> Result<Vec<JobLogEntry>, WarehouseError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM elt_job_log WHERE start_time >= ?1 ORDER BY job_id"
        ))?;
        let rows = stmt.query_map([since], job_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(job_entry(row?)?);
        }
        Ok(out)
    }

    pub fn insert_quality_results(&mut self, results: &[QualityCheckResult]) -> Result<(), WarehouseError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO data_quality_log (check_name, run_at, status, affected_rows, message, details)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for r in results {
                stmt.execute(params![
                    r.check_name,
                    r.run_at,
                    r.status.as_str(),
                    r.affected_rows as i64,
                    r.message,
                    serde_json::to_string(&r.details)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn quality_results_since(&self, since: NaiveDateTime) -> Result<Vec<QualityCheckResult>, WarehouseError> {
        let mut stmt = self.conn.prepare(
            "SELECT check_name, run_at, status, affected_rows, message, details
             FROM data_quality_log WHERE run_at >= ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([since], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, NaiveDateTime>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (check_name, run_at, status, affected, message, details) = row?;
            out.push(QualityCheckResult {
                check_name,
                run_at,
                status: QualityStatus::parse(&status).unwrap_or(QualityStatus::Fail),
                affected_rows: affected.max(0) as u64,
                message,
                details: serde_json::from_str(&details)?,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::test_support::ts;
    use serde_json::json;

    #[test]
    fn job_is_closed_exactly_once() {
        let mut wh = Warehouse::open_in_memory().unwrap();
        let id = wh.start_job(JobType::Load, ts(2, 9, 30), &json!({"window": "x"})).unwrap();
        let running = wh.job(id).unwrap().unwrap();
        assert_eq!(running.status, JobStatus::Running);
        assert_eq!(running.end_time, None);

        let meta = json!({"batches": 2});
        assert!(wh
            .finish_job(id, ts(2, 9, 31), JobStatus::Completed, 150, None, &meta)
            .unwrap());
        assert!(!wh
            .finish_job(id, ts(2, 9, 32), JobStatus::Failed, 0, Some("late"), &meta)
            .unwrap());

        let done = wh.job(id).unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.records_processed, 150);
        assert_eq!(done.end_time, Some(ts(2, 9, 31)));
        assert_eq!(done.metadata, meta);
        assert_eq!(done.job_type, "load");
    }

    #[test]
    fn quality_results_append() {
        let mut wh = Warehouse::open_in_memory().unwrap();
        let result = QualityCheckResult {
            check_name: "completeness".into(),
            run_at: ts(2, 16, 30),
            status: QualityStatus::Fail,
            affected_rows: 1,
            message: "1 symbol missing".into(),
            details: json!({"missing": ["C"]}),
        };
        wh.insert_quality_results(std::slice::from_ref(&result)).unwrap();
        wh.insert_quality_results(std::slice::from_ref(&result)).unwrap();
        let stored = wh.quality_results_since(ts(2, 0, 0)).unwrap();
        assert_eq!(stored, vec![result.clone(), result]);
        assert!(wh.quality_results_since(ts(3, 0, 0)).unwrap().is_empty());
    }
}
