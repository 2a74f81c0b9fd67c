//! Marketlake Core: domain types, market data acquisition, indicator math.
//!
//! This crate holds everything that does not touch the warehouse:
//! - Domain types (bars, indicator rows, aggregates, audit records)
//! - Symbol registry and exchange calendar
//! - Provider trait, FMP HTTP provider, retry policy and circuit breaker
//! - Extraction, resampling and CSV import
//! - Technical indicators, per-bar enrichment and market summary math

pub mod analytics;
pub mod data;
pub mod domain;
pub mod indicators;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: types shared with the runner are Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::Bar>();
        require_sync::<domain::Bar>();
        require_send::<domain::IndicatorRecord>();
        require_sync::<domain::IndicatorRecord>();
        require_send::<domain::DailyAggregate>();
        require_sync::<domain::DailyAggregate>();
        require_send::<domain::MarketSummary>();
        require_sync::<domain::MarketSummary>();
        require_send::<domain::QualityCheckResult>();
        require_sync::<domain::QualityCheckResult>();
        require_send::<domain::JobLogEntry>();
        require_sync::<domain::JobLogEntry>();

        require_send::<data::Registry>();
        require_sync::<data::Registry>();
        require_send::<data::MarketHours>();
        require_sync::<data::MarketHours>();
        require_send::<data::CircuitBreaker>();
        require_sync::<data::CircuitBreaker>();
        require_send::<data::FmpProvider>();
        require_sync::<data::FmpProvider>();
        require_send::<data::DataError>();

        require_send::<indicators::IndicatorValues>();
        require_sync::<indicators::IndicatorValues>();
    }

    /// Architecture contract: the provider seam is object safe so the
    /// extractor and pipeline can run against a mock.
    #[test]
    fn provider_trait_is_object_safe() {
        fn _takes(_: &dyn data::DataProvider) {}
        fn _indicator(_: &dyn indicators::Indicator) {}
    }
}
