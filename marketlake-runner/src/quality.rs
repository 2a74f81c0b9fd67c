//! Data quality checks.
//!
//! Each check reads the warehouse, never writes it, and yields exactly one
//! [`QualityCheckResult`]. Checks are independent: a non-fatal query error
//! in one becomes that check's FAIL row and the others still run.

use crate::config::QualityConfig;
use crate::warehouse::{Warehouse, WarehouseError};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use marketlake_core::data::{MarketHours, Registry};
use marketlake_core::domain::{InstrumentType, QualityCheckResult, QualityStatus, TimeRange};
use serde_json::{json, Value};
use std::collections::HashSet;

pub const PRICE_RELATIONSHIP: &str = "price_relationship";
pub const VOLUME_ANOMALY: &str = "volume_anomaly";
pub const COMPLETENESS: &str = "completeness";
pub const TIMELINESS: &str = "timeliness";
pub const PRICE_SPIKE: &str = "price_spike";
pub const ANALYTICS_COVERAGE: &str = "analytics_coverage";

/// Offending rows listed in `details` per check.
const MAX_DETAIL_ROWS: usize = 50;

/// What a run looks at: bars in `window`, freshness judged at `now`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityScope {
    pub window: TimeRange,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QualityReport {
    pub results: Vec<QualityCheckResult>,
}

impl QualityReport {
    pub fn has_failures(&self) -> bool {
        self.results.iter().any(|r| r.status == QualityStatus::Fail)
    }

    pub fn count(&self, status: QualityStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn get(&self, check_name: &str) -> Option<&QualityCheckResult> {
        self.results.iter().find(|r| r.check_name == check_name)
    }
}

/// Verdict before it is stamped with the run time.
struct Verdict {
    status: QualityStatus,
    affected: u64,
    message: String,
    details: Value,
}

impl Verdict {
    fn pass(message: impl Into<String>) -> Self {
        Self {
            status: QualityStatus::Pass,
            affected: 0,
            message: message.into(),
            details: json!({}),
        }
    }
}

fn capped(rows: Vec<Value>) -> Value {
    let total = rows.len();
    let listed: Vec<Value> = rows.into_iter().take(MAX_DETAIL_ROWS).collect();
    json!({ "rows": listed, "total": total })
}

pub struct QualityChecker<'a> {
    warehouse: &'a Warehouse,
    config: &'a QualityConfig,
    registry: &'a Registry,
    market: MarketHours,
}

impl<'a> QualityChecker<'a> {
    pub fn new(
        warehouse: &'a Warehouse,
        config: &'a QualityConfig,
        registry: &'a Registry,
        market: MarketHours,
    ) -> Self {
        Self {
            warehouse,
            config,
            registry,
            market,
        }
    }

    /// Run every check. Only fatal warehouse errors abort the run.
    pub fn run_checks(&self, scope: QualityScope) -> Result<QualityReport, WarehouseError> {
        let run_at = scope.now.naive_utc();
        let checks: [(&str, fn(&Self, QualityScope) -> Result<Verdict, WarehouseError>); 6] = [
            (PRICE_RELATIONSHIP, Self::price_relationship),
            (VOLUME_ANOMALY, Self::volume_anomaly),
            (COMPLETENESS, Self::completeness),
            (TIMELINESS, Self::timeliness),
            (PRICE_SPIKE, Self::price_spike),
            (ANALYTICS_COVERAGE, Self::analytics_coverage),
        ];

        let mut results = Vec::with_capacity(checks.len());
        for (name, check) in checks {
            let verdict = match check(self, scope) {
                Ok(v) => v,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => Verdict {
                    status: QualityStatus::Fail,
                    affected: 0,
                    message: format!("check errored: {e}"),
                    details: json!({ "error": e.to_string() }),
                },
            };
            match verdict.status {
                QualityStatus::Pass => tracing::info!(check = name, "{}", verdict.message),
                QualityStatus::Warn => tracing::warn!(check = name, affected = verdict.affected, "{}", verdict.message),
                QualityStatus::Fail => tracing::error!(check = name, affected = verdict.affected, "{}", verdict.message),
            }
            results.push(QualityCheckResult {
                check_name: name.to_string(),
                run_at,
                status: verdict.status,
                affected_rows: verdict.affected,
                message: verdict.message,
                details: verdict.details,
            });
        }
        Ok(QualityReport { results })
    }

    fn price_relationship(&self, scope: QualityScope) -> Result<Verdict, WarehouseError> {
        let mut violations = Vec::new();
        let mut checked = 0;
        for kind in InstrumentType::ALL {
            for bar in self.warehouse.raw_bars(kind, scope.window)? {
                checked += 1;
                if let Err(problem) = bar.check_prices() {
                    violations.push(json!({
                        "table": kind.raw_table(),
                        "symbol": bar.symbol,
                        "datetime": bar.timestamp,
                        "problem": problem.to_string(),
                    }));
                }
            }
        }
        if violations.is_empty() {
            return Ok(Verdict::pass(format!("{checked} bars satisfy OHLC relations")));
        }
        Ok(Verdict {
            status: QualityStatus::Fail,
            affected: violations.len() as u64,
            message: format!("{} of {checked} bars violate OHLC relations", violations.len()),
            details: capped(violations),
        })
    }

    fn volume_anomaly(&self, scope: QualityScope) -> Result<Verdict, WarehouseError> {
        let baseline_start = scope.window.start - Duration::days(self.config.volume_window_days);
        let mut anomalies = Vec::new();
        for kind in InstrumentType::ALL {
            let baselines = self
                .warehouse
                .volumes_between(kind, baseline_start, scope.window.start)?;
            for bar in self.warehouse.raw_bars(kind, scope.window)? {
                let Some(history) = baselines.get(&bar.symbol) else {
                    continue;
                };
                if history.len() < self.config.volume_min_samples {
                    continue;
                }
                let n = history.len() as f64;
                let mean = history.iter().map(|&v| v as f64).sum::<f64>() / n;
                let var = history.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
                let std = var.sqrt();
                if std <= 0.0 {
                    continue;
                }
                let z = (bar.volume as f64 - mean) / std;
                if z.abs() > self.config.volume_sigma {
                    anomalies.push(json!({
                        "symbol": bar.symbol,
                        "datetime": bar.timestamp,
                        "volume": bar.volume,
                        "mean": mean,
                        "z": z,
                    }));
                }
            }
        }
        if anomalies.is_empty() {
            return Ok(Verdict::pass("no volume anomalies"));
        }
        Ok(Verdict {
            status: QualityStatus::Warn,
            affected: anomalies.len() as u64,
            message: format!(
                "{} bars deviate more than {}σ from trailing volume",
                anomalies.len(),
                self.config.volume_sigma
            ),
            details: capped(anomalies),
        })
    }

    fn completeness(&self, scope: QualityScope) -> Result<Verdict, WarehouseError> {
        let mut landed: HashSet<(InstrumentType, String)> = HashSet::new();
        for kind in InstrumentType::ALL {
            for symbol in self.warehouse.symbols_in_range(kind, scope.window)? {
                landed.insert((kind, symbol));
            }
        }
        let expected = self.registry.all();
        let missing: Vec<&str> = expected
            .iter()
            .filter(|(kind, symbol)| !landed.contains(&(*kind, symbol.to_string())))
            .map(|(_, symbol)| *symbol)
            .collect();
        if missing.is_empty() {
            return Ok(Verdict::pass(format!("all {} symbols present", expected.len())));
        }
        Ok(Verdict {
            status: QualityStatus::Fail,
            affected: missing.len() as u64,
            message: format!("{} of {} symbols missing: {}", missing.len(), expected.len(), missing.join(", ")),
            details: json!({ "missing": missing }),
        })
    }

    fn timeliness(&self, scope: QualityScope) -> Result<Verdict, WarehouseError> {
        if !self.market.is_open(scope.now) {
            return Ok(Verdict::pass("market closed"));
        }
        let local_now = self.market.local(scope.now);
        let max_age = Duration::minutes(self.config.staleness_minutes);
        let mut stale = Vec::new();
        for kind in InstrumentType::ALL {
            let latest = self.warehouse.latest_timestamps(kind)?;
            for symbol in self.registry.symbols(kind) {
                let last: Option<NaiveDateTime> = latest.get(symbol).copied();
                let is_stale = last.map_or(true, |ts| local_now - ts > max_age);
                if is_stale {
                    stale.push(json!({ "symbol": symbol, "latest": last }));
                }
            }
        }
        if stale.is_empty() {
            return Ok(Verdict::pass(format!(
                "every symbol updated within {} minutes",
                self.config.staleness_minutes
            )));
        }
        Ok(Verdict {
            status: QualityStatus::Warn,
            affected: stale.len() as u64,
            message: format!(
                "{} symbols older than {} minutes",
                stale.len(),
                self.config.staleness_minutes
            ),
            details: capped(stale),
        })
    }

    fn price_spike(&self, scope: QualityScope) -> Result<Verdict, WarehouseError> {
        let mut spikes = Vec::new();
        for kind in InstrumentType::ALL {
            for bar in self.warehouse.raw_bars(kind, scope.window)? {
                if bar.open <= 0.0 {
                    continue;
                }
                let move_pct = (bar.close - bar.open).abs() / bar.open * 100.0;
                if move_pct > self.config.price_spike_pct {
                    spikes.push(json!({
                        "symbol": bar.symbol,
                        "datetime": bar.timestamp,
                        "move_pct": move_pct,
                    }));
                }
            }
        }
        if spikes.is_empty() {
            return Ok(Verdict::pass("no intrabar price spikes"));
        }
        Ok(Verdict {
            status: QualityStatus::Warn,
            affected: spikes.len() as u64,
            message: format!("{} bars move more than {}% open to close", spikes.len(), self.config.price_spike_pct),
            details: capped(spikes),
        })
    }

    fn analytics_coverage(&self, scope: QualityScope) -> Result<Verdict, WarehouseError> {
        let mut missing = Vec::new();
        for kind in InstrumentType::ALL {
            for (symbol, ts) in self.warehouse.untransformed_bars(kind, scope.window)? {
                missing.push(json!({ "table": kind.raw_table(), "symbol": symbol, "datetime": ts }));
            }
        }
        if missing.is_empty() {
            return Ok(Verdict::pass("analytics cover every raw bar"));
        }
        Ok(Verdict {
            status: QualityStatus::Warn,
            affected: missing.len() as u64,
            message: format!("{} raw bars not yet transformed", missing.len()),
            details: capped(missing),
        })
    }
}
