//! Subscriber setup.
//!
//! - JSON: one structured object per event, for log shipping
//! - Text: colored, human-readable lines for terminals

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const FORMAT_ENV: &str = "MARKETLAKE_LOG_FORMAT";

/// `--log-json` wins; otherwise `MARKETLAKE_LOG_FORMAT=json` selects JSON.
pub fn wants_json(flag: bool) -> bool {
    flag || std::env::var(FORMAT_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("json"))
}

/// Install the global subscriber. Filtering follows `RUST_LOG`, default `info`.
/// Logs go to stderr so stdout carries only the run summary.
pub fn init(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}
