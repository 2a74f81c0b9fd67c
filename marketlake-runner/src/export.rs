//! Wide CSV export: one row per stock bar, alongside the treasury yields and
//! index and commodity closes in effect at that bar.

use crate::warehouse::{ExportRow, Warehouse, WarehouseError};
use anyhow::{Context, Result};
use marketlake_core::data::Registry;
use marketlake_core::domain::{InstrumentType, TimeRange};
use std::io::Write;
use std::path::Path;

const FIXED_COLUMNS: [&str; 7] = ["stock_ID", "Close", "Volume_PP", "DATETIME", "US2Y_PP", "US5Y_PP", "US10Y_PP"];

/// Column name for a reference symbol: `^GSPC` becomes `GSPC_PP`.
pub fn reference_column(symbol: &str) -> String {
    format!("{}_PP", symbol.replace('^', "").replace('/', "_"))
}

#[derive(Debug, Clone, PartialEq)]
pub struct WideExport {
    pub range: TimeRange,
    /// Index then commodity symbols, in registry order.
    pub references: Vec<String>,
    pub rows: Vec<ExportRow>,
}

impl WideExport {
    /// Bars of the registry's stocks inside `range`.
    pub fn build(warehouse: &Warehouse, registry: &Registry, range: TimeRange) -> Result<Self, WarehouseError> {
        let references: Vec<(InstrumentType, String)> = registry
            .indexes
            .iter()
            .map(|s| (InstrumentType::Index, s.clone()))
            .chain(registry.commodities.iter().map(|s| (InstrumentType::Commodity, s.clone())))
            .collect();
        let rows = warehouse.wide_export(&registry.stocks, &references, range)?;
        Ok(Self {
            range,
            references: references.into_iter().map(|(_, s)| s).collect(),
            rows,
        })
    }

    pub fn header(&self) -> Vec<String> {
        FIXED_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(self.references.iter().map(|s| reference_column(s)))
            .collect()
    }

    /// Missing values are written as empty fields.
    pub fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        let mut out = csv::Writer::from_writer(writer);
        out.write_record(self.header())?;
        let cell = |v: Option<f64>| v.map_or_else(String::new, |x| x.to_string());
        for row in &self.rows {
            let mut record = vec![
                row.symbol.clone(),
                row.close.to_string(),
                row.volume.to_string(),
                row.datetime.format("%Y-%m-%d %H:%M:%S").to_string(),
                cell(row.us2y),
                cell(row.us5y),
                cell(row.us10y),
            ];
            record.extend(row.references.iter().map(|v| cell(*v)));
            out.write_record(&record)?;
        }
        out.flush().context("failed to flush csv export")?;
        Ok(())
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = std::fs::File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        self.write_to(std::io::BufWriter::new(file))
            .with_context(|| format!("failed to write {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::test_support::{bar, ts};
    use marketlake_core::domain::TreasuryRate;

    fn registry() -> Registry {
        Registry {
            stocks: vec!["AAPL".into()],
            indexes: vec!["^GSPC".into()],
            commodities: vec!["GCUSD".into()],
            bonds: true,
        }
    }

    fn loaded() -> Warehouse {
        let mut wh = Warehouse::open_in_memory().unwrap();
        let mut index = bar("^GSPC", ts(2, 9, 30), 4700.0);
        index.instrument_type = InstrumentType::Index;
        wh.merge_batch(
            "b",
            &[bar("AAPL", ts(2, 9, 30), 187.5), bar("AAPL", ts(2, 9, 45), 188.0), bar("TSLA", ts(2, 9, 30), 250.0), index],
            &[],
        )
        .unwrap();
        wh.upsert_rates(&[TreasuryRate {
            date: ts(2, 0, 0).date(),
            year2: Some(4.33),
            year5: Some(3.93),
            year10: Some(3.95),
            ..Default::default()
        }])
        .unwrap();
        wh
    }

    #[test]
    fn reference_columns_drop_caret() {
        assert_eq!(reference_column("^GSPC"), "GSPC_PP");
        assert_eq!(reference_column("EUR/USD"), "EUR_USD_PP");
        assert_eq!(reference_column("GCUSD"), "GCUSD_PP");
    }

    #[test]
    fn writes_registry_stocks_with_references() {
        let export = WideExport::build(&loaded(), &registry(), TimeRange::day(ts(2, 0, 0).date())).unwrap();
        let mut buf = Vec::new();
        export.write_to(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "stock_ID,Close,Volume_PP,DATETIME,US2Y_PP,US5Y_PP,US10Y_PP,GSPC_PP,GCUSD_PP");
        assert_eq!(lines[1], "AAPL,187.5,1000,2024-01-02 09:30:00,4.33,3.93,3.95,4700,");
        assert_eq!(lines.len(), 3);
        assert!(!text.contains("TSLA"));
    }

    #[test]
    fn write_csv_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exports").join("wide.csv");
        let export = WideExport::build(&loaded(), &registry(), TimeRange::day(ts(2, 0, 0).date())).unwrap();
        export.write_csv(&path).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        assert_eq!(reader.headers().unwrap().len(), 9);
        let records: Vec<csv::StringRecord> = reader.records().collect::<Result<_, _>>().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(&records[1][0], "AAPL");
        assert_eq!(&records[1][3], "2024-01-02 09:45:00");
    }
}
