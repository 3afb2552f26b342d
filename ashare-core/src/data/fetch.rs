//! Per-symbol fetch adapter.
//!
//! Turns a `(dataset, instrument, window)` request into one canonical batch
//! and enforces the inter-request delay after every provider call.

use super::provider::{DataError, DataProvider};
use crate::dataset::{Adjust, Dataset};
use crate::universe::Instrument;
use polars::prelude::*;
use std::time::Duration;

pub struct SymbolFetcher<'a> {
    provider: &'a dyn DataProvider,
    adjusts: Vec<Adjust>,
    delay: Duration,
}

impl<'a> SymbolFetcher<'a> {
    pub fn new(provider: &'a dyn DataProvider, adjusts: Vec<Adjust>, delay: Duration) -> Self {
        Self {
            provider,
            adjusts,
            delay,
        }
    }

    pub fn provider(&self) -> &dyn DataProvider {
        self.provider
    }

    /// Fetch one dataset for one instrument over `[start, end]`.
    ///
    /// Prices are fetched once per configured adjustment and stacked; the
    /// first failing adjustment fails the whole symbol.
    pub fn fetch(
        &self,
        dataset: Dataset,
        instrument: &Instrument,
        start: &str,
        end: &str,
    ) -> Result<DataFrame, DataError> {
        match dataset.statement_kind() {
            None => {
                let mut frames = Vec::with_capacity(self.adjusts.len());
                for &adjust in &self.adjusts {
                    let df = self.throttled(|| {
                        self.provider.daily_prices(instrument, start, end, adjust)
                    })?;
                    if df.height() > 0 {
                        frames.push(df);
                    }
                }
                stack(frames)
            }
            Some(kind) => self.throttled(|| {
                self.provider
                    .financial_statement(instrument, kind, start, end)
            }),
        }
    }

    fn throttled<T>(&self, call: impl FnOnce() -> Result<T, DataError>) -> Result<T, DataError> {
        let result = call();
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        result
    }
}

/// Vertical union of frames whose columns may differ.
fn stack(mut frames: Vec<DataFrame>) -> Result<DataFrame, DataError> {
    if frames.len() <= 1 {
        return Ok(frames.pop().unwrap_or_else(DataFrame::empty));
    }
    let lazy: Vec<LazyFrame> = frames.into_iter().map(|df| df.lazy()).collect();
    concat_lf_diagonal(
        lazy,
        UnionArgs {
            to_supertypes: true,
            ..Default::default()
        },
    )
    .and_then(|lf| lf.collect())
    .map_err(|e| DataError::Other(format!("stack price batches: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::StatementKind;
    use crate::universe::CalendarDay;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<String>>,
    }

    impl DataProvider for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        fn list_instruments(&self) -> Result<Vec<Instrument>, DataError> {
            Ok(Vec::new())
        }

        fn trade_calendar(&self, _: &str, _: &str) -> Result<Vec<CalendarDay>, DataError> {
            Ok(Vec::new())
        }

        fn daily_prices(
            &self,
            instrument: &Instrument,
            start: &str,
            _: &str,
            adjust: Adjust,
        ) -> Result<DataFrame, DataError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("prices:{}", adjust.as_str()));
            Ok(df!(
                "ts_code" => [instrument.ts_code.as_str()],
                "trade_date" => [start],
                "adjust" => [adjust.as_str()],
                "close" => [10.0]
            )
            .unwrap())
        }

        fn financial_statement(
            &self,
            _: &Instrument,
            kind: StatementKind,
            _: &str,
            _: &str,
        ) -> Result<DataFrame, DataError> {
            self.calls.lock().unwrap().push(format!("{kind:?}"));
            Err(DataError::NetworkUnreachable("down".into()))
        }
    }

    fn instrument() -> Instrument {
        Instrument {
            ts_code: "600000.SH".into(),
            symbol: "600000".into(),
            name: "浦发银行".into(),
            exchange: "SSE".into(),
            market: "主板".into(),
        }
    }

    #[test]
    fn prices_fan_out_over_adjustments() {
        let provider = Recording::default();
        let fetcher = SymbolFetcher::new(&provider, vec![Adjust::None, Adjust::Qfq], Duration::ZERO);
        let df = fetcher
            .fetch(Dataset::PriceDaily, &instrument(), "20230103", "20230131")
            .unwrap();

        assert_eq!(df.height(), 2);
        assert_eq!(
            *provider.calls.lock().unwrap(),
            vec!["prices:none".to_string(), "prices:qfq".to_string()]
        );
    }

    #[test]
    fn statement_errors_pass_through() {
        let provider = Recording::default();
        let fetcher = SymbolFetcher::new(&provider, vec![Adjust::None], Duration::ZERO);
        let err = fetcher
            .fetch(Dataset::CashflowStatement, &instrument(), "20220101", "20221231")
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(
            *provider.calls.lock().unwrap(),
            vec!["CashflowStatement".to_string()]
        );
    }
}
