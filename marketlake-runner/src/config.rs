//! Pipeline configuration.
//!
//! Loaded from a TOML file; every table and field has a default so an empty
//! file (or no file) yields a working configuration. `validate()` turns
//! nonsensical settings into fatal errors before any job starts.

use chrono::{NaiveTime, Weekday};
use chrono_tz::Tz;
use marketlake_core::data::{ExtractOptions, MarketHours, Registry, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("api key not set: export {0} or add it to .env")]
    MissingApiKey(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub warehouse: WarehouseConfig,
    pub api: ApiConfig,
    pub elt: EltConfig,
    pub rate_limit: RateLimitConfig,
    pub market: MarketConfig,
    pub quality: QualityConfig,
    pub transform: TransformConfig,
    pub schedule: ScheduleConfig,
    pub registry: Registry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    pub path: PathBuf,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("marketlake.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: marketlake_core::data::fmp::DEFAULT_BASE_URL.to_string(),
            api_key_env: "FMP_API_KEY".to_string(),
            timeout_secs: 30,
        }
    }
}

impl ApiConfig {
    pub fn api_key(&self) -> Result<String, ConfigError> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingApiKey(self.api_key_env.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EltConfig {
    pub batch_size: usize,
    pub lookback_periods: usize,
    pub bar_interval_minutes: u32,
    pub index_native_interval_minutes: u32,
    /// Hours covered by an incremental extract.
    pub incremental_hours: i64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_jitter: f64,
    /// Staging rows older than this are removed by cleanup.
    pub staging_max_age_days: i64,
}

impl Default for EltConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            lookback_periods: 200,
            bar_interval_minutes: 15,
            index_native_interval_minutes: 5,
            incremental_hours: 2,
            max_retries: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 30_000,
            retry_jitter: 0.1,
            staging_max_age_days: 30,
        }
    }
}

impl EltConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries.max(1),
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            jitter: self.retry_jitter,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub call_delay_ms: u64,
    pub batch_delay_ms: u64,
    pub symbol_batch_size: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            call_delay_ms: 100,
            batch_delay_ms: 1000,
            symbol_batch_size: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub timezone: String,
    pub open: String,
    pub close: String,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            timezone: "America/New_York".to_string(),
            open: "09:30".to_string(),
            close: "16:00".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub volume_sigma: f64,
    pub volume_window_days: i64,
    /// Fewer trailing samples than this skips the volume check for a symbol.
    pub volume_min_samples: usize,
    pub staleness_minutes: i64,
    pub price_spike_pct: f64,
    /// Exit non-zero (and skip cleanup) when any check FAILs.
    pub fail_on_error: bool,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            volume_sigma: 3.0,
            volume_window_days: 30,
            volume_min_samples: 10,
            staleness_minutes: 120,
            price_spike_pct: 20.0,
            fail_on_error: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub top_n: usize,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self { top_n: 5 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub end_of_day: String,
    pub backfill: String,
    pub weekly_report_day: String,
    pub weekly_report_time: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            end_of_day: "16:30".to_string(),
            backfill: "06:00".to_string(),
            weekly_report_day: "Mon".to_string(),
            weekly_report_time: "07:00".to_string(),
        }
    }
}

/// Parsed schedule times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleTimes {
    pub end_of_day: NaiveTime,
    pub backfill: NaiveTime,
    pub weekly_report_day: Weekday,
    pub weekly_report_time: NaiveTime,
}

fn parse_time(field: &str, s: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|_| ConfigError::Invalid(format!("{field} must be HH:MM, got '{s}'")))
}

impl PipelineConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            let config = Self::default();
            config.validate()?;
            Ok(config)
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        let elt = &self.elt;
        if elt.batch_size == 0 {
            return invalid("elt.batch_size must be > 0");
        }
        if elt.bar_interval_minutes == 0 || 1440 % elt.bar_interval_minutes != 0 {
            return invalid("elt.bar_interval_minutes must be > 0 and divide a day");
        }
        if elt.index_native_interval_minutes == 0
            || elt.bar_interval_minutes % elt.index_native_interval_minutes != 0
        {
            return invalid("elt.index_native_interval_minutes must divide elt.bar_interval_minutes");
        }
        if elt.incremental_hours <= 0 {
            return invalid("elt.incremental_hours must be > 0");
        }
        if self.rate_limit.symbol_batch_size == 0 {
            return invalid("rate_limit.symbol_batch_size must be > 0");
        }
        if !(0.0..1.0).contains(&elt.retry_jitter) {
            return invalid("elt.retry_jitter must be in [0, 1)");
        }
        if self.quality.volume_sigma <= 0.0 || self.quality.price_spike_pct <= 0.0 {
            return invalid("quality thresholds must be positive");
        }
        let hours = self.market_hours()?;
        if hours.open >= hours.close {
            return invalid("market.open must be before market.close");
        }
        self.schedule_times()?;
        let bad = self.registry.invalid_symbols();
        if !bad.is_empty() {
            return Err(ConfigError::Invalid(format!("invalid registry symbols: {}", bad.join(", "))));
        }
        Ok(())
    }

    pub fn market_hours(&self) -> Result<MarketHours, ConfigError> {
        let tz: Tz = self
            .market
            .timezone
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("unknown timezone '{}'", self.market.timezone)))?;
        Ok(MarketHours::new(
            tz,
            parse_time("market.open", &self.market.open)?,
            parse_time("market.close", &self.market.close)?,
        ))
    }

    pub fn schedule_times(&self) -> Result<ScheduleTimes, ConfigError> {
        let s = &self.schedule;
        let weekly_report_day: Weekday = s
            .weekly_report_day
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("unknown weekday '{}'", s.weekly_report_day)))?;
        Ok(ScheduleTimes {
            end_of_day: parse_time("schedule.end_of_day", &s.end_of_day)?,
            backfill: parse_time("schedule.backfill", &s.backfill)?,
            weekly_report_day,
            weekly_report_time: parse_time("schedule.weekly_report_time", &s.weekly_report_time)?,
        })
    }

    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            base_interval_minutes: self.elt.bar_interval_minutes,
            index_native_interval_minutes: self.elt.index_native_interval_minutes,
            call_delay: Duration::from_millis(self.rate_limit.call_delay_ms),
            batch_delay: Duration::from_millis(self.rate_limit.batch_delay_ms),
            symbol_batch_size: self.rate_limit.symbol_batch_size,
        }
    }

    /// Deterministic BLAKE3 hash of the serialized configuration, recorded
    /// in job metadata so runs trace back to their settings.
    pub fn config_hash(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"));
        blake3::hash(json.as_bytes()).to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_valid_defaults() {
        let config = PipelineConfig::from_toml("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        config.validate().unwrap();
        assert_eq!(config.elt.batch_size, 100);
        assert_eq!(config.elt.lookback_periods, 200);
        assert_eq!(config.registry.stocks.len(), 29);
    }

    #[test]
    fn partial_tables_keep_other_defaults() {
        let config = PipelineConfig::from_toml(
            r#"
            [elt]
            batch_size = 50

            [registry]
            stocks = ["AAPL"]
            indexes = []
            "#,
        )
        .unwrap();
        assert_eq!(config.elt.batch_size, 50);
        assert_eq!(config.elt.bar_interval_minutes, 15);
        assert_eq!(config.registry.stocks, vec!["AAPL"]);
        assert!(config.registry.indexes.is_empty());
        assert_eq!(config.registry.commodities.len(), 2);
    }

    #[test]
    fn rejects_zero_batch_and_bad_interval() {
        let mut config = PipelineConfig::default();
        config.elt.batch_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = PipelineConfig::default();
        config.elt.bar_interval_minutes = 7;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_timezone_and_inverted_session() {
        let mut config = PipelineConfig::default();
        config.market.timezone = "Mars/Olympus".into();
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.market.open = "16:00".into();
        config.market.close = "09:30".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn schedule_times_parse() {
        let times = PipelineConfig::default().schedule_times().unwrap();
        assert_eq!(times.weekly_report_day, Weekday::Mon);
        assert_eq!(times.end_of_day, NaiveTime::from_hms_opt(16, 30, 0).unwrap());
    }

    #[test]
    fn config_hash_is_deterministic_and_sensitive() {
        let a = PipelineConfig::default();
        let mut b = a.clone();
        assert_eq!(a.config_hash(), b.config_hash());
        b.quality.fail_on_error = true;
        assert_ne!(a.config_hash(), b.config_hash());
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.transform.top_n, 5);
    }
}
