//! SQLite warehouse: raw landing tables, staging, analytics and audit.
//!
//! One [`Warehouse`] wraps one connection. Every write path runs inside a
//! single transaction, so a failed call leaves prior state untouched.
//! Queries are split by layer:
//! - [`raw`]: staging, merge into raw tables, lookback reads
//! - [`analytics`]: enriched bars, indicators, aggregates, summaries
//! - [`audit`]: job log, quality log, load rejections
//! - [`stats`]: load statistics and table summaries
//! - [`export`]: the wide as-of export

pub mod analytics;
pub mod audit;
pub mod export;
pub mod raw;
pub mod schema;
pub mod stats;

pub use export::ExportRow;
pub use raw::{LoadRejection, MergeCounts};
pub use stats::{CountByStatus, TableStats};

use rusqlite::{Connection, ErrorCode};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("warehouse table missing: {0}")]
    MissingTable(String),

    #[error("serialize: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("create warehouse directory {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl WarehouseError {
    /// Busy or locked database: another writer holds the lock.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Sqlite(e) => matches!(
                e.sqlite_error_code(),
                Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
            ),
            Self::Io { .. } => true,
            _ => false,
        }
    }

    /// Schema problems that no retry can fix.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::MissingTable(_) => true,
            Self::Sqlite(rusqlite::Error::SqliteFailure(_, Some(msg))) => msg.contains("no such table"),
            _ => false,
        }
    }
}

/// Round at the storage boundary.
pub(crate) fn round_to(value: f64, decimals: u32) -> f64 {
    let scale = 10f64.powi(decimals as i32);
    (value * scale).round() / scale
}

pub struct Warehouse {
    conn: Connection,
}

impl Warehouse {
    /// Open (creating if needed) the warehouse file and its schema.
    pub fn open(path: &Path) -> Result<Self, WarehouseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| WarehouseError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        let warehouse = Self { conn };
        warehouse.init_schema()?;
        tracing::debug!(path = %path.display(), "warehouse opened");
        Ok(warehouse)
    }

    pub fn open_in_memory() -> Result<Self, WarehouseError> {
        let warehouse = Self {
            conn: Connection::open_in_memory()?,
        };
        warehouse.init_schema()?;
        Ok(warehouse)
    }

    /// Open without creating the schema; jobs against an existing file call
    /// [`require_tables`](Self::require_tables) to fail fast.
    pub fn open_existing(path: &Path) -> Result<Self, WarehouseError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self { conn })
    }

    pub fn init_schema(&self) -> Result<(), WarehouseError> {
        schema::init_schema(&self.conn)?;
        Ok(())
    }

    pub fn require_tables(&self) -> Result<(), WarehouseError> {
        for table in schema::required_tables() {
            if !schema::table_exists(&self.conn, table)? {
                return Err(WarehouseError::MissingTable(table.to_string()));
            }
        }
        Ok(())
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{Duration, NaiveDate, NaiveDateTime};
    use marketlake_core::domain::{Bar, InstrumentType};

    pub fn ts(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    pub fn bar(symbol: &str, timestamp: NaiveDateTime, close: f64) -> Bar {
        Bar {
            symbol: symbol.into(),
            instrument_type: InstrumentType::Stock,
            timestamp,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1_000,
        }
    }

    /// `n` consecutive 15-minute bars starting at `start`.
    pub fn series(symbol: &str, start: NaiveDateTime, n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                bar(
                    symbol,
                    start + Duration::minutes(15 * i as i64),
                    100.0 + i as f64 * 0.1,
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_parent_dir_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("lake.db");
        let wh = Warehouse::open(&path).unwrap();
        assert!(path.exists());
        wh.require_tables().unwrap();
    }

    #[test]
    fn missing_table_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.db");
        let wh = Warehouse::open_existing(&path).unwrap();
        let err = wh.require_tables().unwrap_err();
        assert!(err.is_fatal());
        assert!(!err.is_transient());
    }

    #[test]
    fn no_such_table_from_sqlite_is_fatal() {
        let conn = Connection::open_in_memory().unwrap();
        let err: WarehouseError = conn
            .execute("DELETE FROM stock_data_raw", [])
            .unwrap_err()
            .into();
        assert!(err.is_fatal());
    }

    #[test]
    fn rounding() {
        assert_eq!(round_to(187.12345, 2), 187.12);
        assert_eq!(round_to(4783.456789, 4), 4783.4568);
    }
}
