//! A-share runner: configuration and ingestion orchestration.
//!
//! This crate builds on `ashare-core` to provide:
//! - Layered configuration (defaults, TOML file, environment)
//! - Full backfill and incremental update with per-symbol resume
//! - Retry of symbols recorded in the failure ledger
//! - Progress callbacks and per-pass statistics

pub mod config;
pub mod pipeline;
pub mod progress;
pub mod stats;

pub use config::{AppConfig, Backend, ConfigError};
pub use pipeline::{checked_date, Ingestor, PipelineError};
pub use progress::{IngestProgress, SilentProgress, TracingProgress};
pub use stats::{PassStats, RunSummary, SymbolOutcome};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn config_is_send_sync() {
        assert_send::<AppConfig>();
        assert_sync::<AppConfig>();
    }

    #[test]
    fn errors_are_send_sync() {
        assert_send::<PipelineError>();
        assert_sync::<PipelineError>();
        assert_send::<ConfigError>();
        assert_sync::<ConfigError>();
    }
}
