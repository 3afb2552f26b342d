//! Progress callbacks for per-symbol passes.

use crate::stats::{PassStats, SymbolOutcome};
use ashare_core::{Dataset, Mode};

/// Progress callback for multi-symbol passes.
pub trait IngestProgress {
    /// Called before fetching a symbol.
    fn on_start(&self, dataset: Dataset, mode: Mode, ts_code: &str, index: usize, total: usize);

    /// Called after a symbol is fetched and stored (or skipped).
    fn on_complete(
        &self,
        dataset: Dataset,
        mode: Mode,
        ts_code: &str,
        index: usize,
        total: usize,
        outcome: &SymbolOutcome,
    );

    /// Called when a pass over the universe is done.
    fn on_pass_complete(&self, stats: &PassStats);
}

/// Reports through `tracing`: per-symbol lines at debug, failures at warn.
pub struct TracingProgress;

impl IngestProgress for TracingProgress {
    fn on_start(&self, dataset: Dataset, mode: Mode, ts_code: &str, index: usize, total: usize) {
        tracing::debug!(%dataset, %mode, ts_code, index, total, "fetching");
    }

    fn on_complete(
        &self,
        dataset: Dataset,
        mode: Mode,
        ts_code: &str,
        index: usize,
        total: usize,
        outcome: &SymbolOutcome,
    ) {
        match outcome {
            SymbolOutcome::Written { rows, max_date } => tracing::debug!(
                %dataset,
                %mode,
                ts_code,
                index,
                total,
                rows,
                max_date = max_date.as_deref().unwrap_or(""),
                "stored"
            ),
            SymbolOutcome::Empty => {
                tracing::debug!(%dataset, %mode, ts_code, index, total, "no rows")
            }
            SymbolOutcome::Failed(error) => tracing::warn!(
                %dataset,
                %mode,
                ts_code,
                index,
                total,
                error = error.as_str(),
                "fetch failed, skipping symbol"
            ),
        }
        if (index + 1) % 100 == 0 {
            tracing::info!(%dataset, %mode, done = index + 1, total, "progress");
        }
    }

    fn on_pass_complete(&self, stats: &PassStats) {
        stats.log_summary();
    }
}

/// Discards every event.
pub struct SilentProgress;

impl IngestProgress for SilentProgress {
    fn on_start(&self, _: Dataset, _: Mode, _: &str, _: usize, _: usize) {}

    fn on_complete(&self, _: Dataset, _: Mode, _: &str, _: usize, _: usize, _: &SymbolOutcome) {}

    fn on_pass_complete(&self, _: &PassStats) {}
}
