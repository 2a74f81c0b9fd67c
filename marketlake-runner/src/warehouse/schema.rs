//! Warehouse DDL.
//!
//! Raw and analytics bar tables share one shape per layer and are created
//! for each instrument type. Timestamps are exchange-local TEXT
//! (`YYYY-MM-DD HH:MM:SS`), so lexical order is chronological order.

use marketlake_core::domain::InstrumentType;
use rusqlite::Connection;

const RAW_BARS: &str = "
CREATE TABLE IF NOT EXISTS {table} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    datetime TEXT NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    volume INTEGER NOT NULL,
    batch_id TEXT,
    loaded_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT,
    UNIQUE(symbol, datetime)
);
CREATE INDEX IF NOT EXISTS idx_{table}_datetime ON {table}(datetime);
CREATE INDEX IF NOT EXISTS idx_{table}_loaded_at ON {table}(loaded_at);
";

const ANALYTICS_BARS: &str = "
CREATE TABLE IF NOT EXISTS {table} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    datetime TEXT NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    volume INTEGER NOT NULL,
    price_change REAL,
    price_change_pct REAL,
    avg_price REAL,
    volatility REAL,
    relative_volume REAL,
    data_quality_score INTEGER NOT NULL,
    transformed_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(symbol, datetime)
);
";

const SHARED: &str = "
CREATE TABLE IF NOT EXISTS bond_data_raw (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    date TEXT NOT NULL UNIQUE,
    month1 REAL,
    month3 REAL,
    month6 REAL,
    year1 REAL,
    year2 REAL,
    year5 REAL,
    year10 REAL,
    year20 REAL,
    year30 REAL,
    loaded_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS bond_data (
    date TEXT PRIMARY KEY,
    year2 REAL,
    year10 REAL,
    year30 REAL,
    yield_curve_slope REAL,
    term_spread REAL,
    inverted INTEGER,
    transformed_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS bar_staging (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id TEXT NOT NULL,
    table_type TEXT NOT NULL,
    symbol TEXT NOT NULL,
    datetime TEXT NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    volume INTEGER NOT NULL,
    staged_at TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_bar_staging_batch ON bar_staging(batch_id);

CREATE TABLE IF NOT EXISTS load_rejections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id TEXT NOT NULL,
    table_type TEXT NOT NULL,
    symbol TEXT NOT NULL,
    datetime TEXT,
    reason TEXT NOT NULL,
    detail TEXT NOT NULL,
    rejected_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS technical_indicators (
    symbol TEXT NOT NULL,
    table_type TEXT NOT NULL,
    datetime TEXT NOT NULL,
    sma_20 REAL,
    sma_50 REAL,
    sma_200 REAL,
    ema_12 REAL,
    ema_26 REAL,
    macd REAL,
    macd_signal REAL,
    macd_histogram REAL,
    rsi_14 REAL,
    bb_upper REAL,
    bb_mid REAL,
    bb_lower REAL,
    bb_width REAL,
    bb_position REAL,
    volume_sma_20 REAL,
    volume_ratio REAL,
    price_change_1d REAL,
    price_change_5d REAL,
    price_change_20d REAL,
    volatility_20d REAL,
    calculated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (symbol, table_type, datetime)
);

CREATE TABLE IF NOT EXISTS daily_aggregates (
    symbol TEXT NOT NULL,
    table_type TEXT NOT NULL,
    date TEXT NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    volume INTEGER NOT NULL,
    vwap REAL,
    bar_count INTEGER NOT NULL,
    calculated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (symbol, date)
);

CREATE TABLE IF NOT EXISTS market_summary (
    date TEXT NOT NULL,
    market TEXT NOT NULL,
    total_symbols INTEGER NOT NULL,
    avg_volume REAL NOT NULL,
    total_volume INTEGER NOT NULL,
    up_volume INTEGER NOT NULL DEFAULT 0,
    down_volume INTEGER NOT NULL DEFAULT 0,
    avg_price_change REAL NOT NULL,
    top_gainers TEXT NOT NULL,
    top_losers TEXT NOT NULL,
    advancing INTEGER NOT NULL,
    declining INTEGER NOT NULL,
    unchanged INTEGER NOT NULL,
    market_breadth REAL NOT NULL,
    advance_decline_ratio REAL,
    calculated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (date, market)
);

CREATE TABLE IF NOT EXISTS elt_job_log (
    job_id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_type TEXT NOT NULL,
    start_time TEXT NOT NULL,
    end_time TEXT,
    status TEXT NOT NULL CHECK (status IN ('running', 'completed', 'failed')),
    records_processed INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    metadata TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_elt_job_log_start ON elt_job_log(start_time);

CREATE TABLE IF NOT EXISTS data_quality_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    check_name TEXT NOT NULL,
    run_at TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('PASS', 'WARN', 'FAIL')),
    affected_rows INTEGER NOT NULL DEFAULT 0,
    message TEXT NOT NULL,
    details TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_data_quality_log_run_at ON data_quality_log(run_at);
";

/// Every table the pipeline reads or writes.
pub fn required_tables() -> Vec<&'static str> {
    let mut tables = Vec::new();
    for kind in InstrumentType::ALL {
        tables.push(kind.raw_table());
        tables.push(kind.analytics_table());
    }
    tables.extend([
        "bond_data_raw",
        "bond_data",
        "bar_staging",
        "load_rejections",
        "technical_indicators",
        "daily_aggregates",
        "market_summary",
        "elt_job_log",
        "data_quality_log",
    ]);
    tables
}

/// Full DDL script, idempotent.
pub fn schema_sql() -> String {
    let mut sql = String::new();
    for kind in InstrumentType::ALL {
        sql.push_str(&RAW_BARS.replace("{table}", kind.raw_table()));
        sql.push_str(&ANALYTICS_BARS.replace("{table}", kind.analytics_table()));
    }
    sql.push_str(SHARED);
    sql
}

pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(&schema_sql())
}

pub fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        [table],
        |row| row.get(0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_creates_every_required_table() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        for table in required_tables() {
            assert!(table_exists(&conn, table).unwrap(), "missing {table}");
        }
    }

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
    }
}
