//! Send daily prices to one provider and everything else to another.

use super::provider::{DataError, DataProvider};
use crate::dataset::{Adjust, StatementKind};
use crate::universe::{CalendarDay, Instrument};
use polars::prelude::DataFrame;

/// A provider that answers `daily_prices` from `prices` and every other call
/// from `data`.
pub struct PriceRouted<D, P> {
    data: D,
    prices: P,
    name: String,
}

impl<D: DataProvider, P: DataProvider> PriceRouted<D, P> {
    pub fn new(data: D, prices: P) -> Self {
        let name = format!("{}+{}", data.name(), prices.name());
        Self { data, prices, name }
    }
}

impl<D: DataProvider, P: DataProvider> DataProvider for PriceRouted<D, P> {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_instruments(&self) -> Result<Vec<Instrument>, DataError> {
        self.data.list_instruments()
    }

    fn trade_calendar(&self, start: &str, end: &str) -> Result<Vec<CalendarDay>, DataError> {
        self.data.trade_calendar(start, end)
    }

    fn daily_prices(
        &self,
        instrument: &Instrument,
        start: &str,
        end: &str,
        adjust: Adjust,
    ) -> Result<DataFrame, DataError> {
        self.prices.daily_prices(instrument, start, end, adjust)
    }

    fn financial_statement(
        &self,
        instrument: &Instrument,
        kind: StatementKind,
        start: &str,
        end: &str,
    ) -> Result<DataFrame, DataError> {
        self.data.financial_statement(instrument, kind, start, end)
    }
}
