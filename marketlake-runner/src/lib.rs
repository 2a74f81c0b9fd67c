//! MarketLake Runner: warehouse, loading, transformation, quality and scheduling.
//!
//! This crate builds on `marketlake-core` to provide:
//! - A SQLite warehouse with raw, analytics and audit tables
//! - Staged, batched raw loading with rejection records and job logging
//! - Indicator, daily aggregate and market summary transformation
//! - Data quality checks persisted to the quality log
//! - Weekly reporting, warehouse statistics and the wide CSV export
//! - Composite pipeline jobs and the tick scheduler

pub mod config;
pub mod export;
pub mod loader;
pub mod pipeline;
pub mod quality;
pub mod report;
pub mod scheduler;
pub mod transform;
pub mod warehouse;

pub use config::{ConfigError, PipelineConfig, ScheduleTimes};
pub use export::WideExport;
pub use loader::{LoadError, LoadOptions, LoadResult, RawLoader};
pub use pipeline::{JobFailure, Pipeline, PipelineError, RunSummary};
pub use quality::{QualityChecker, QualityReport, QualityScope};
pub use report::{Performer, WeeklyReport};
pub use scheduler::{Clock, ManualClock, ScheduleStats, Scheduler, SystemClock, Tick};
pub use transform::{TransformError, TransformOptions, TransformResult, Transformer};
pub use warehouse::{Warehouse, WarehouseError};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn config_types_are_send_sync() {
        assert_send::<PipelineConfig>();
        assert_sync::<PipelineConfig>();
        assert_send::<LoadOptions>();
        assert_sync::<TransformOptions>();
    }

    #[test]
    fn results_are_send_sync() {
        assert_send::<RunSummary>();
        assert_sync::<RunSummary>();
        assert_send::<LoadResult>();
        assert_sync::<QualityReport>();
        assert_sync::<WeeklyReport>();
        assert_send::<WideExport>();
    }

    #[test]
    fn warehouse_can_move_between_threads() {
        assert_send::<Warehouse>();
        assert_send::<Pipeline>();
        assert_send::<PipelineError>();
        assert_send::<JobFailure>();
    }
}
