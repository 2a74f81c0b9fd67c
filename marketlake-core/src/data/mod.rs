//! Market data acquisition: registry, calendar, providers, extraction, CSV import.

pub mod circuit_breaker;
pub mod csv_import;
pub mod extract;
pub mod fmp;
pub mod market_hours;
pub mod provider;
pub mod registry;
pub mod resample;
pub mod retry;

pub use circuit_breaker::CircuitBreaker;
pub use extract::{ExtractOptions, ExtractSummary, Extractor};
pub use fmp::FmpProvider;
pub use market_hours::{format_duration, MarketHours};
pub use provider::{DataError, DataProvider, ExtractProgress, LogProgress, RawQuote, SilentProgress};
pub use registry::{validate_symbol, Registry};
pub use resample::{resample, roll_up_daily};
pub use retry::{RetryError, RetryPolicy};
