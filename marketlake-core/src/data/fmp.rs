//! Financial Modeling Prep (FMP) data provider.
//!
//! Fetches intraday OHLCV bars from the `historical-chart/{n}min` endpoint and
//! treasury yield curves from `treasury-rates`. Requests go through the shared
//! [`RetryPolicy`] and the circuit breaker. Responses are newest-first JSON
//! arrays with exchange-local `date` strings.

use super::circuit_breaker::CircuitBreaker;
use super::provider::{DataError, DataProvider, RawQuote};
use super::retry::{RetryError, RetryPolicy};
use crate::domain::TreasuryRate;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://financialmodelingprep.com/stable";

#[derive(Debug, Deserialize)]
struct ChartRecord {
    date: String,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    volume: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TreasuryRecord {
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

/// Error payload FMP returns with a 200 status, e.g. for an invalid key.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "Error Message")]
    message: String,
}

pub struct FmpProvider {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    circuit_breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

impl FmpProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent("marketlake/0.1")
            .build()
            .map_err(|e| DataError::Network(format!("build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            circuit_breaker,
            retry,
        })
    }

    fn chart_url(&self, symbol: &str, interval_minutes: u32, from: NaiveDate, to: NaiveDate) -> String {
        format!(
            "{}/historical-chart/{interval_minutes}min?symbol={symbol}&from={from}&to={to}&apikey={}",
            self.base_url, self.api_key
        )
    }

    fn treasury_url(&self, from: NaiveDate, to: NaiveDate) -> String {
        format!(
            "{}/treasury-rates?from={from}&to={to}&apikey={}",
            self.base_url, self.api_key
        )
    }

    /// One GET with status handling; returns the body text.
    fn get_once(&self, url: &str, label: &str) -> Result<String, DataError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(DataError::CircuitBreakerTripped);
        }
        let resp = self.client.get(url).send().map_err(|e| {
            self.circuit_breaker.record_failure();
            DataError::Network(format!("{label}: {e}"))
        })?;
        let status = resp.status();

        if status == reqwest::StatusCode::FORBIDDEN {
            self.circuit_breaker.trip();
            return Err(DataError::CircuitBreakerTripped);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(DataError::AuthenticationRequired(
                "FMP rejected the API key".into(),
            ));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            self.circuit_breaker.record_failure();
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(DataError::RateLimited {
                retry_after_secs: retry_after,
            });
        }
        if !status.is_success() {
            self.circuit_breaker.record_failure();
            return Err(DataError::Upstream {
                status: status.as_u16(),
                symbol: label.to_string(),
            });
        }

        let body = resp
            .text()
            .map_err(|e| DataError::Network(format!("{label}: read body: {e}")))?;
        self.circuit_breaker.record_success();
        Ok(body)
    }

    fn get_with_retry(&self, url: &str, label: &str) -> Result<String, DataError> {
        self.retry
            .run(|_| self.get_once(url, label), DataError::is_transient)
            .map_err(RetryError::into_inner)
    }
}

impl DataProvider for FmpProvider {
    fn name(&self) -> &str {
        "fmp"
    }

    fn fetch_intraday(
        &self,
        symbol: &str,
        interval_minutes: u32,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<RawQuote>, DataError> {
        let url = self.chart_url(symbol, interval_minutes, from.date(), to.date());
        let body = self.get_with_retry(&url, symbol)?;
        let quotes = parse_chart(symbol, &body)?;
        Ok(quotes
            .into_iter()
            .filter(|q| q.timestamp >= from && q.timestamp <= to)
            .collect())
    }

    fn fetch_treasury(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<TreasuryRate>, DataError> {
        let url = self.treasury_url(from, to);
        let body = self.get_with_retry(&url, "treasury")?;
        parse_treasury(&body)
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}

fn check_error_body(body: &str) -> Result<(), DataError> {
    if let Ok(err) = serde_json::from_str::<ErrorBody>(body) {
        return Err(DataError::AuthenticationRequired(err.message));
    }
    Ok(())
}

/// Parse a `historical-chart` response. Records with any missing price are
/// skipped; an empty array means the symbol is unknown or has no data.
pub fn parse_chart(symbol: &str, body: &str) -> Result<Vec<RawQuote>, DataError> {
    check_error_body(body)?;
    let records: Vec<ChartRecord> = serde_json::from_str(body).map_err(|e| {
        DataError::ResponseFormatChanged(format!("failed to parse chart for {symbol}: {e}"))
    })?;

    let mut quotes = Vec::with_capacity(records.len());
    for rec in records {
        let timestamp = parse_timestamp(&rec.date).ok_or_else(|| {
            DataError::ResponseFormatChanged(format!("invalid timestamp '{}' for {symbol}", rec.date))
        })?;
        let (Some(open), Some(high), Some(low), Some(close)) = (rec.open, rec.high, rec.low, rec.close)
        else {
            tracing::debug!(symbol, %timestamp, "skipping quote with missing prices");
            continue;
        };
        quotes.push(RawQuote {
            timestamp,
            open,
            high,
            low,
            close,
            volume: rec.volume.unwrap_or(0.0).round() as i64,
        });
    }
    quotes.sort_by_key(|q| q.timestamp);
    Ok(quotes)
}

pub fn parse_treasury(body: &str) -> Result<Vec<TreasuryRate>, DataError> {
    check_error_body(body)?;
    let records: Vec<TreasuryRecord> = serde_json::from_str(body)
        .map_err(|e| DataError::ResponseFormatChanged(format!("failed to parse treasury: {e}")))?;
    let mut rates = records
        .into_iter()
        .map(|r| {
            let date = NaiveDate::parse_from_str(&r.date, "%Y-%m-%d").map_err(|_| {
                DataError::ResponseFormatChanged(format!("invalid treasury date '{}'", r.date))
            })?;
            Ok(TreasuryRate {
                date,
                month1: r.month1,
                month3: r.month3,
                month6: r.month6,
                year1: r.year1,
                year2: r.year2,
                year5: r.year5,
                year10: r.year10,
                year20: r.year20,
                year30: r.year30,
            })
        })
        .collect::<Result<Vec<_>, DataError>>()?;
    rates.sort_by_key(|r| r.date);
    Ok(rates)
}

/// Accepts `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` and bare dates.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}
