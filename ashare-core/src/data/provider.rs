//! Data provider trait and structured error types.
//!
//! The DataProvider trait abstracts over market data sources so the ingestion
//! pipeline can run against the HTTP gateways in production and a scripted
//! double in tests. Rows returned from a provider are already in the canonical
//! schema: mapping provider column names happens inside the implementation.

use crate::dataset::{Adjust, StatementKind};
use crate::universe::{CalendarDay, Instrument};
use polars::prelude::DataFrame;
use thiserror::Error;

/// Structured error types for provider calls.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("provider returned HTTP {status} for {endpoint}")]
    HttpStatus { status: u16, endpoint: String },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("response from {endpoint} has no '{column}' column")]
    MissingColumn { endpoint: String, column: String },

    #[error("{provider} does not serve {operation}")]
    Unsupported {
        provider: String,
        operation: &'static str,
    },

    #[error("data error: {0}")]
    Other(String),
}

impl DataError {
    /// Whether repeating the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            DataError::NetworkUnreachable(_) | DataError::RateLimited { .. } => true,
            DataError::HttpStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Trait for market data providers.
///
/// Every call may fail; retries and throttling are layered on top
/// (see [`super::retry::Retrying`] and [`super::fetch::SymbolFetcher`]).
pub trait DataProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Every main-board instrument currently listed.
    fn list_instruments(&self) -> Result<Vec<Instrument>, DataError>;

    /// Trading days in `[start, end]` (`YYYYMMDD`, inclusive).
    fn trade_calendar(&self, start: &str, end: &str) -> Result<Vec<CalendarDay>, DataError>;

    /// Daily bars for one instrument. The frame carries `ts_code`, `trade_date`
    /// and `adjust` plus the price columns.
    fn daily_prices(
        &self,
        instrument: &Instrument,
        start: &str,
        end: &str,
        adjust: Adjust,
    ) -> Result<DataFrame, DataError>;

    /// One statement family for one instrument, restricted to report dates in
    /// `[start, end]`. The frame carries `ts_code` and `end_date`.
    fn financial_statement(
        &self,
        instrument: &Instrument,
        kind: StatementKind,
        start: &str,
        end: &str,
    ) -> Result<DataFrame, DataError>;
}

impl<P: DataProvider + ?Sized> DataProvider for Box<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn list_instruments(&self) -> Result<Vec<Instrument>, DataError> {
        (**self).list_instruments()
    }

    fn trade_calendar(&self, start: &str, end: &str) -> Result<Vec<CalendarDay>, DataError> {
        (**self).trade_calendar(start, end)
    }

    fn daily_prices(
        &self,
        instrument: &Instrument,
        start: &str,
        end: &str,
        adjust: Adjust,
    ) -> Result<DataFrame, DataError> {
        (**self).daily_prices(instrument, start, end, adjust)
    }

    fn financial_statement(
        &self,
        instrument: &Instrument,
        kind: StatementKind,
        start: &str,
        end: &str,
    ) -> Result<DataFrame, DataError> {
        (**self).financial_statement(instrument, kind, start, end)
    }
}

impl<P: DataProvider + ?Sized> DataProvider for &P {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn list_instruments(&self) -> Result<Vec<Instrument>, DataError> {
        (**self).list_instruments()
    }

    fn trade_calendar(&self, start: &str, end: &str) -> Result<Vec<CalendarDay>, DataError> {
        (**self).trade_calendar(start, end)
    }

    fn daily_prices(
        &self,
        instrument: &Instrument,
        start: &str,
        end: &str,
        adjust: Adjust,
    ) -> Result<DataFrame, DataError> {
        (**self).daily_prices(instrument, start, end, adjust)
    }

    fn financial_statement(
        &self,
        instrument: &Instrument,
        kind: StatementKind,
        start: &str,
        end: &str,
    ) -> Result<DataFrame, DataError> {
        (**self).financial_statement(instrument, kind, start, end)
    }
}
