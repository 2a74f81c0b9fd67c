//! Per-bar enrichment and market-wide roll-ups.

pub mod enrich;
pub mod summary;

pub use enrich::{enrich, quality_score};
pub use summary::{daily_changes, market_summary, DailyChange};
