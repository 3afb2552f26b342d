//! Ingestion orchestrator: full backfill, incremental update and failed-symbol
//! retry.
//!
//! Each pass walks the sorted universe from its stored progress index. Per
//! symbol: fetch, merge into the dataset's partitions, raise the data
//! watermark, then commit `index + 1` as the new progress. A fetch failure
//! skips the symbol (progress still advances) and lands in the failure
//! ledger. Storage errors abort the run; everything committed before them
//! stays valid.

use crate::config::AppConfig;
use crate::progress::{IngestProgress, TracingProgress};
use crate::stats::{PassStats, RunSummary, SymbolOutcome};
use ashare_core::data::{DataError, DataProvider, SymbolFetcher};
use ashare_core::dates::{next_day, normalize_date, parse_date};
use ashare_core::store::{MetaStore, PartitionStore, StoreError};
use ashare_core::{Dataset, Instrument, Mode, Universe};
use std::collections::BTreeMap;
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to refresh instrument or calendar snapshot: {0}")]
    Universe(#[source] DataError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid date '{0}' (expected YYYYMMDD)")]
    InvalidDate(String),
}

/// Normalize `value` and check that it names a real day.
pub fn checked_date(value: &str) -> Result<String, PipelineError> {
    let normalized = normalize_date(value);
    match parse_date(&normalized) {
        Some(_) => Ok(normalized),
        None => Err(PipelineError::InvalidDate(value.to_string())),
    }
}

pub struct Ingestor<'a> {
    config: &'a AppConfig,
    fetcher: SymbolFetcher<'a>,
    meta: MetaStore,
    progress: Box<dyn IngestProgress + 'a>,
}

impl<'a> Ingestor<'a> {
    pub fn new(config: &'a AppConfig, provider: &'a dyn DataProvider, meta: MetaStore) -> Self {
        let fetcher = SymbolFetcher::new(
            provider,
            config.price_adjusts.clone(),
            config.request_delay(),
        );
        Self {
            config,
            fetcher,
            meta,
            progress: Box::new(TracingProgress),
        }
    }

    pub fn with_progress(mut self, progress: impl IngestProgress + 'a) -> Self {
        self.progress = Box::new(progress);
        self
    }

    pub fn meta(&self) -> &MetaStore {
        &self.meta
    }

    /// Full backfill of every dataset over `[start, end]`.
    pub fn full(&mut self, start: &str, end: &str) -> Result<RunSummary, PipelineError> {
        let start = checked_date(start)?;
        let end = checked_date(end)?;
        tracing::info!(start = %start, end = %end, "full backfill");

        let universe = self.refresh_snapshots(&start, &end)?;
        let mut summary = RunSummary::default();
        for dataset in Dataset::ALL {
            let stats = self.run_pass(dataset, Mode::Full, &universe, &start, &end)?;
            summary.passes.push(stats);
        }
        Ok(summary)
    }

    /// Incremental update of every dataset up to `end`. Each dataset starts
    /// the day after its own data watermark, or at the configured default.
    pub fn update(&mut self, end: &str) -> Result<RunSummary, PipelineError> {
        let end = checked_date(end)?;
        let default_start = self.config.default_start();
        tracing::info!(end = %end, "incremental update");

        let universe = self.refresh_snapshots(&default_start, &end)?;
        let mut summary = RunSummary::default();
        for dataset in Dataset::ALL {
            let start = self.update_start(dataset)?;
            if start > end {
                tracing::info!(%dataset, start = %start, end = %end, "already up to date");
                continue;
            }
            let stats = self.run_pass(dataset, Mode::Update, &universe, &start, &end)?;
            summary.passes.push(stats);
        }
        Ok(summary)
    }

    /// First date an update pass of `dataset` would request.
    pub fn update_start(&self, dataset: Dataset) -> Result<String, PipelineError> {
        Ok(match self.meta.get_watermark(dataset.id())? {
            Some(marker) => next_day(&marker),
            None => self.config.default_start(),
        })
    }

    /// Re-fetch every symbol in the failure ledger with its recorded window.
    ///
    /// Progress watermarks are left alone; data watermarks are raised.
    pub fn retry_failures(&mut self) -> Result<RunSummary, PipelineError> {
        let failures = self.meta.list_failures()?;
        if failures.is_empty() {
            tracing::info!("no recorded failures");
            return Ok(RunSummary::default());
        }
        let universe = Universe::from_instruments(self.meta.load_instruments()?);
        tracing::info!(failures = failures.len(), "retrying failed symbols");

        let mut passes: BTreeMap<(Dataset, &'static str), PassStats> = BTreeMap::new();
        let total = failures.len();
        for (index, failure) in failures.iter().enumerate() {
            let stats = passes
                .entry((failure.dataset, failure.mode.as_str()))
                .or_insert_with(|| {
                    PassStats::new(
                        failure.dataset,
                        failure.mode,
                        &failure.start_date,
                        &failure.end_date,
                    )
                });
            stats.universe += 1;

            let instrument = match universe.get(&failure.ts_code) {
                Some(inst) => inst.clone(),
                None => {
                    tracing::warn!(
                        ts_code = %failure.ts_code,
                        "symbol no longer in the instrument snapshot, keeping failure"
                    );
                    continue;
                }
            };

            let started = Instant::now();
            self.progress
                .on_start(failure.dataset, failure.mode, &failure.ts_code, index, total);
            let outcome = ingest_symbol(
                &self.fetcher,
                &self.meta,
                self.config,
                failure.dataset,
                failure.mode,
                &instrument,
                &failure.start_date,
                &failure.end_date,
            )?;
            self.progress.on_complete(
                failure.dataset,
                failure.mode,
                &failure.ts_code,
                index,
                total,
                &outcome,
            );
            stats.record(&outcome);
            stats.elapsed += started.elapsed();
        }

        let summary = RunSummary {
            passes: passes.into_values().collect(),
        };
        for stats in &summary.passes {
            self.progress.on_pass_complete(stats);
        }
        Ok(summary)
    }

    /// Replace the instrument and calendar snapshots and return the universe
    /// they define. Provider failures here are fatal.
    pub fn refresh_snapshots(&mut self, start: &str, end: &str) -> Result<Universe, PipelineError> {
        let provider = self.fetcher.provider();
        let instruments = provider
            .list_instruments()
            .map_err(PipelineError::Universe)?;
        let calendar = provider
            .trade_calendar(start, end)
            .map_err(PipelineError::Universe)?;

        self.meta.replace_instruments(&instruments)?;
        self.meta.replace_calendar(&calendar)?;

        let universe = Universe::from_instruments(self.meta.load_instruments()?);
        if universe.is_empty() {
            tracing::warn!("instrument snapshot is empty, passes will not fetch anything");
        }
        tracing::info!(
            instruments = universe.len(),
            trading_days = calendar.len(),
            "snapshots refreshed"
        );
        Ok(universe)
    }

    /// One `(dataset, mode)` pass over the universe, resuming from the stored
    /// progress index.
    pub fn run_pass(
        &self,
        dataset: Dataset,
        mode: Mode,
        universe: &Universe,
        start: &str,
        end: &str,
    ) -> Result<PassStats, PipelineError> {
        let started = Instant::now();
        let total = universe.len();
        let resume = self.meta.progress(dataset, mode)?;

        let mut stats = PassStats::new(dataset, mode, start, end);
        stats.resumed_at = resume;
        stats.universe = total;

        if resume > 0 {
            tracing::info!(%dataset, %mode, resume, total, "resuming pass");
        }

        for (index, instrument) in universe.instruments().iter().enumerate().skip(resume) {
            self.progress
                .on_start(dataset, mode, &instrument.ts_code, index, total);
            let outcome = ingest_symbol(
                &self.fetcher,
                &self.meta,
                self.config,
                dataset,
                mode,
                instrument,
                start,
                end,
            )?;
            self.meta.set_progress(dataset, mode, index + 1)?;
            self.progress
                .on_complete(dataset, mode, &instrument.ts_code, index, total, &outcome);
            stats.record(&outcome);
        }

        stats.elapsed = started.elapsed();
        self.progress.on_pass_complete(&stats);
        Ok(stats)
    }
}

/// Fetch, store and account for one symbol. Only storage errors escape.
#[allow(clippy::too_many_arguments)]
fn ingest_symbol(
    fetcher: &SymbolFetcher<'_>,
    meta: &MetaStore,
    config: &AppConfig,
    dataset: Dataset,
    mode: Mode,
    instrument: &Instrument,
    start: &str,
    end: &str,
) -> Result<SymbolOutcome, StoreError> {
    let batch = match fetcher.fetch(dataset, instrument, start, end) {
        Ok(batch) => batch,
        Err(e) => {
            let error = e.to_string();
            meta.record_failure(dataset, mode, &instrument.ts_code, start, end, &error)?;
            return Ok(SymbolOutcome::Failed(error));
        }
    };

    let outcome = if batch.height() == 0 {
        SymbolOutcome::Empty
    } else {
        let store = PartitionStore::new(config.dataset_dir(dataset));
        let report = store.upsert(&batch, dataset.partition_column(), dataset.natural_key())?;
        if let Some(max_date) = &report.max_date {
            meta.raise_watermark(dataset.id(), max_date)?;
        }
        SymbolOutcome::Written {
            rows: report.rows_in,
            max_date: report.max_date,
        }
    };
    meta.clear_failure(dataset, mode, &instrument.ts_code, start, end)?;
    Ok(outcome)
}
