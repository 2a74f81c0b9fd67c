//! Domain types for the market-data warehouse

pub mod audit;
pub mod bar;
pub mod records;
pub mod window;

pub use audit::{JobLogEntry, JobStatus, JobType, QualityCheckResult, QualityStatus};
pub use bar::{is_aligned, Bar, BarRejection, InstrumentType};
pub use records::{
    AnalyticsBar, BondAnalytics, DailyAggregate, IndicatorRecord, IndicatorValuesRow,
    MarketSummary, Mover, TreasuryRate,
};
pub use window::TimeRange;

/// Symbol type alias
pub type Symbol = String;
