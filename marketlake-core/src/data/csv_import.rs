//! CSV import for offline loads.
//!
//! Layout under the import directory:
//!
//! ```text
//! {dir}/stocks/*.csv       symbol,date,open,high,low,close,volume
//! {dir}/indexes/*.csv      (same)
//! {dir}/commodities/*.csv  (same)
//! {dir}/bonds/*.csv        date,month1,month3,month6,year1,year2,year5,year10,year20,year30
//! ```
//!
//! Parsing only types the rows. Value checks (positive prices, OHLC
//! relations) belong to the raw loader so CSV and API loads reject identically.

use super::fmp::parse_timestamp;
use super::provider::DataError;
use crate::domain::{Bar, InstrumentType, TreasuryRate};
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsvKind {
    Ohlcv(InstrumentType),
    Bonds,
}

impl CsvKind {
    /// Subdirectories in processing order.
    pub const ORDER: [(&'static str, CsvKind); 4] = [
        ("stocks", CsvKind::Ohlcv(InstrumentType::Stock)),
        ("indexes", CsvKind::Ohlcv(InstrumentType::Index)),
        ("commodities", CsvKind::Ohlcv(InstrumentType::Commodity)),
        ("bonds", CsvKind::Bonds),
    ];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvFile {
    pub path: PathBuf,
    pub kind: CsvKind,
}

/// A row that could not be typed, with its 1-based data line number.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvRejection {
    pub line: u64,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ParsedBars {
    pub bars: Vec<Bar>,
    pub rejected: Vec<CsvRejection>,
}

#[derive(Debug, Default)]
pub struct ParsedRates {
    pub rates: Vec<TreasuryRate>,
    pub rejected: Vec<CsvRejection>,
}

#[derive(Debug, Deserialize)]
struct OhlcvRow {
    symbol: String,
    date: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

#[derive(Debug, Deserialize)]
struct BondRow {
    date: String,
    month1: Option<f64>,
    month3: Option<f64>,
    month6: Option<f64>,
    year1: Option<f64>,
    year2: Option<f64>,
    year5: Option<f64>,
    year10: Option<f64>,
    year20: Option<f64>,
    year30: Option<f64>,
}

fn csv_error(path: &Path, e: impl std::fmt::Display) -> DataError {
    DataError::Csv {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

/// List importable files, kind by kind, each kind sorted by file name.
/// Missing subdirectories are skipped.
pub fn discover(dir: &Path) -> Result<Vec<CsvFile>, DataError> {
    let mut files = Vec::new();
    for (sub, kind) in CsvKind::ORDER {
        let sub_dir = dir.join(sub);
        if !sub_dir.is_dir() {
            continue;
        }
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&sub_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("csv")))
            .collect();
        paths.sort();
        files.extend(paths.into_iter().map(|path| CsvFile { path, kind }));
    }
    Ok(files)
}

pub fn read_bars(path: &Path, kind: InstrumentType) -> Result<ParsedBars, DataError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| csv_error(path, e))?;
    parse_bars(&mut reader, kind).map_err(|e| csv_error(path, e))
}

fn parse_bars<R: std::io::Read>(
    reader: &mut csv::Reader<R>,
    kind: InstrumentType,
) -> Result<ParsedBars, csv::Error> {
    let headers = reader.headers()?.clone();
    let mut parsed = ParsedBars::default();
    for (i, record) in reader.records().enumerate() {
        let line = i as u64 + 1;
        let row: OhlcvRow = match record.and_then(|r| r.deserialize(Some(&headers))) {
            Ok(row) => row,
            Err(e) => {
                parsed.rejected.push(CsvRejection { line, reason: e.to_string() });
                continue;
            }
        };
        let Some(timestamp) = parse_timestamp(&row.date) else {
            parsed.rejected.push(CsvRejection {
                line,
                reason: format!("invalid date '{}'", row.date),
            });
            continue;
        };
        parsed.bars.push(Bar {
            symbol: row.symbol.to_ascii_uppercase(),
            instrument_type: kind,
            timestamp,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume.round() as i64,
        });
    }
    Ok(parsed)
}

pub fn read_rates(path: &Path) -> Result<ParsedRates, DataError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| csv_error(path, e))?;
    parse_rates(&mut reader).map_err(|e| csv_error(path, e))
}

fn parse_rates<R: std::io::Read>(reader: &mut csv::Reader<R>) -> Result<ParsedRates, csv::Error> {
    let headers = reader.headers()?.clone();
    let mut parsed = ParsedRates::default();
    for (i, record) in reader.records().enumerate() {
        let line = i as u64 + 1;
        let row: BondRow = match record.and_then(|r| r.deserialize(Some(&headers))) {
            Ok(row) => row,
            Err(e) => {
                parsed.rejected.push(CsvRejection { line, reason: e.to_string() });
                continue;
            }
        };
        let Some(date) = parse_timestamp(&row.date).map(|ts| ts.date()) else {
            parsed.rejected.push(CsvRejection {
                line,
                reason: format!("invalid date '{}'", row.date),
            });
            continue;
        };
        parsed.rates.push(TreasuryRate {
            date,
            month1: row.month1,
            month3: row.month3,
            month6: row.month6,
            year1: row.year1,
            year2: row.year2,
            year5: row.year5,
            year10: row.year10,
            year20: row.year20,
            year30: row.year30,
        });
    }
    Ok(parsed)
}

/// Move a processed file to `{dir}/archive/processed_{YYYYMMDD}_{name}`.
pub fn archive(file: &Path, dir: &Path, on: NaiveDate) -> Result<PathBuf, DataError> {
    let archive_dir = dir.join("archive");
    std::fs::create_dir_all(&archive_dir)?;
    let name = file
        .file_name()
        .ok_or_else(|| csv_error(file, "path has no file name"))?
        .to_string_lossy();
    let target = archive_dir.join(format!("processed_{}_{name}", on.format("%Y%m%d")));
    std::fs::rename(file, &target)?;
    tracing::info!(from = %file.display(), to = %target.display(), "archived csv");
    Ok(target)
}
