//! Per-pass counters and the run summary.

use ashare_core::{Dataset, Mode};
use std::time::Duration;

/// What happened to one symbol in a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolOutcome {
    /// Rows merged into the store; `max_date` is the batch maximum.
    Written { rows: usize, max_date: Option<String> },
    /// The provider answered with no rows for the window.
    Empty,
    /// The fetch failed; the symbol was skipped.
    Failed(String),
}

/// Counters for one `(dataset, mode)` pass over the universe.
#[derive(Debug, Clone, PartialEq)]
pub struct PassStats {
    pub dataset: Dataset,
    pub mode: Mode,
    pub start_date: String,
    pub end_date: String,
    /// Index the pass resumed from.
    pub resumed_at: usize,
    pub universe: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub empty: usize,
    pub failed: usize,
    pub rows_written: usize,
    pub elapsed: Duration,
}

impl PassStats {
    pub fn new(dataset: Dataset, mode: Mode, start_date: &str, end_date: &str) -> Self {
        Self {
            dataset,
            mode,
            start_date: start_date.to_string(),
            end_date: end_date.to_string(),
            resumed_at: 0,
            universe: 0,
            attempted: 0,
            succeeded: 0,
            empty: 0,
            failed: 0,
            rows_written: 0,
            elapsed: Duration::ZERO,
        }
    }

    pub fn record(&mut self, outcome: &SymbolOutcome) {
        self.attempted += 1;
        match outcome {
            SymbolOutcome::Written { rows, .. } => {
                self.succeeded += 1;
                self.rows_written += rows;
            }
            SymbolOutcome::Empty => self.empty += 1,
            SymbolOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn log_summary(&self) {
        tracing::info!(
            dataset = %self.dataset,
            mode = %self.mode,
            window = format!("{}..{}", self.start_date, self.end_date),
            resumed_at = self.resumed_at,
            universe = self.universe,
            attempted = self.attempted,
            succeeded = self.succeeded,
            empty = self.empty,
            failed = self.failed,
            rows = self.rows_written,
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "pass complete"
        );
    }
}

/// Every pass of one command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub passes: Vec<PassStats>,
}

impl RunSummary {
    pub fn failed(&self) -> usize {
        self.passes.iter().map(|p| p.failed).sum()
    }

    pub fn rows_written(&self) -> usize {
        self.passes.iter().map(|p| p.rows_written).sum()
    }

    pub fn pass(&self, dataset: Dataset) -> Option<&PassStats> {
        self.passes.iter().find(|p| p.dataset == dataset)
    }

    pub fn log_summary(&self, operation: &str) {
        let attempted: usize = self.passes.iter().map(|p| p.attempted).sum();
        tracing::info!(
            operation,
            passes = self.passes.len(),
            attempted,
            failed = self.failed(),
            rows = self.rows_written(),
            "run complete"
        );
        if self.failed() > 0 {
            tracing::warn!(
                failed = self.failed(),
                "some symbols failed; run `retry-failed` to fetch them again"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_counts_outcomes() {
        let mut stats = PassStats::new(Dataset::PriceDaily, Mode::Full, "20230101", "20230131");
        stats.record(&SymbolOutcome::Written {
            rows: 3,
            max_date: Some("20230104".into()),
        });
        stats.record(&SymbolOutcome::Empty);
        stats.record(&SymbolOutcome::Failed("timeout".into()));

        assert_eq!(stats.attempted, 3);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.empty, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.rows_written, 3);
    }
}
