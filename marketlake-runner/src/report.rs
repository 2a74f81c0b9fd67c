//! Weekly warehouse report: table coverage, stock performers, quality and
//! job summaries over the last seven days.

use crate::warehouse::{CountByStatus, TableStats, Warehouse, WarehouseError};
use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use marketlake_core::domain::{DailyAggregate, InstrumentType};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

pub const REPORT_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Performer {
    pub symbol: String,
    pub first_open: f64,
    pub last_close: f64,
    pub change_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyReport {
    pub generated_at: NaiveDateTime,
    pub since: NaiveDate,
    pub tables: Vec<TableStats>,
    pub top_performers: Vec<Performer>,
    pub bottom_performers: Vec<Performer>,
    pub quality: Vec<CountByStatus>,
    pub jobs: Vec<CountByStatus>,
}

/// First open to last close per symbol; best `n` first, worst `n` first.
pub fn performers(aggregates: &[DailyAggregate], n: usize) -> (Vec<Performer>, Vec<Performer>) {
    let mut spans: BTreeMap<&str, (&DailyAggregate, &DailyAggregate)> = BTreeMap::new();
    for a in aggregates {
        spans
            .entry(a.symbol.as_str())
            .and_modify(|(first, last)| {
                if a.date < first.date {
                    *first = a;
                }
                if a.date > last.date {
                    *last = a;
                }
            })
            .or_insert((a, a));
    }
    let mut all: Vec<Performer> = spans
        .into_iter()
        .filter(|(_, (first, _))| first.open > 0.0)
        .map(|(symbol, (first, last))| Performer {
            symbol: symbol.to_string(),
            first_open: first.open,
            last_close: last.close,
            change_pct: (last.close - first.open) / first.open * 100.0,
        })
        .collect();
    all.sort_by(|a, b| b.change_pct.total_cmp(&a.change_pct).then_with(|| a.symbol.cmp(&b.symbol)));
    let top = all.iter().take(n).cloned().collect();
    let bottom = all.iter().rev().take(n).cloned().collect();
    (top, bottom)
}

impl WeeklyReport {
    /// `now` is UTC (audit tables); `today` is the exchange-local date.
    pub fn build(warehouse: &Warehouse, now: NaiveDateTime, today: NaiveDate, top_n: usize) -> Result<Self, WarehouseError> {
        let since = today - Duration::days(REPORT_DAYS);
        let audit_since = now - Duration::days(REPORT_DAYS);
        let stocks = warehouse.daily_aggregates_between(InstrumentType::Stock, since, today)?;
        let (top_performers, bottom_performers) = performers(&stocks, top_n);
        Ok(Self {
            generated_at: now,
            since,
            tables: warehouse.table_summaries()?,
            top_performers,
            bottom_performers,
            quality: warehouse.quality_counts_since(audit_since)?,
            jobs: warehouse.job_counts_since(audit_since)?,
        })
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let fmt_ts = |ts: Option<NaiveDateTime>| ts.map_or_else(|| "-".to_string(), |t| t.to_string());

        let _ = writeln!(out, "Weekly report since {} (generated {})", self.since, self.generated_at);
        let _ = writeln!(out);
        let _ = writeln!(out, "{:<20} {:>10} {:>8}  {:<19}  {:<19}", "table", "records", "symbols", "earliest", "latest");
        for t in &self.tables {
            let _ = writeln!(
                out,
                "{:<20} {:>10} {:>8}  {:<19}  {:<19}",
                t.table,
                t.records,
                t.symbols,
                fmt_ts(t.earliest),
                fmt_ts(t.latest)
            );
        }

        for (title, list) in [("Top performers", &self.top_performers), ("Bottom performers", &self.bottom_performers)] {
            let _ = writeln!(out);
            let _ = writeln!(out, "{title}");
            if list.is_empty() {
                let _ = writeln!(out, "  (no daily aggregates)");
            }
            for p in list {
                let _ = writeln!(
                    out,
                    "  {:<8} {:>10.2} -> {:>10.2}  {:>+7.2}%",
                    p.symbol, p.first_open, p.last_close, p.change_pct
                );
            }
        }

        for (title, counts) in [("Quality checks", &self.quality), ("Jobs", &self.jobs)] {
            let _ = writeln!(out);
            let _ = writeln!(out, "{title}");
            if counts.is_empty() {
                let _ = writeln!(out, "  (none)");
            }
            for c in counts {
                let _ = writeln!(out, "  {:<20} {:<10} {:>6}", c.name, c.status, c.count);
            }
        }
        out
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize weekly report")
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(path, self.to_json()?).with_context(|| format!("failed to write {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agg(symbol: &str, day: u32, open: f64, close: f64) -> DailyAggregate {
        DailyAggregate {
            symbol: symbol.into(),
            table_type: InstrumentType::Stock,
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            volume: 1_000,
            vwap: None,
            bar_count: 26,
        }
    }

    #[test]
    fn performers_span_first_open_to_last_close() {
        let aggs = vec![
            agg("AAPL", 3, 101.0, 104.0),
            agg("AAPL", 2, 100.0, 101.0),
            agg("MSFT", 2, 200.0, 190.0),
            agg("MSFT", 3, 190.0, 180.0),
            agg("NVDA", 2, 50.0, 50.0),
        ];
        let (top, bottom) = performers(&aggs, 2);
        assert_eq!(top[0].symbol, "AAPL");
        assert!((top[0].change_pct - 4.0).abs() < 1e-9);
        assert_eq!(top[1].symbol, "NVDA");
        assert_eq!(bottom[0].symbol, "MSFT");
        assert!((bottom[0].change_pct + 10.0).abs() < 1e-9);
    }

    #[test]
    fn report_renders_and_writes_json() {
        let wh = Warehouse::open_in_memory().unwrap();
        let now = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap().and_hms_opt(12, 0, 0).unwrap();
        let report = WeeklyReport::build(&wh, now, now.date(), 5).unwrap();
        let text = report.render_text();
        assert!(text.contains("stock_data_raw"));
        assert!(text.contains("(no daily aggregates)"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("weekly.json");
        report.write_json(&path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["tables"].as_array().unwrap().len(), 3);
    }
}
