//! Retry with exponential backoff as a provider combinator.
//!
//! `Retrying` wraps any `DataProvider` and re-invokes calls that failed with a
//! transient error. Permanent errors (format changes, missing columns) are
//! returned immediately. Once attempts are exhausted the last error reaches
//! the caller unchanged.

use super::provider::{DataError, DataProvider};
use crate::dataset::{Adjust, StatementKind};
use crate::universe::{CalendarDay, Instrument};
use polars::prelude::DataFrame;
use std::time::Duration;

/// How often and how patiently to retry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero behaves like one.
    pub max_attempts: u32,
    /// Sleep before the second attempt; doubles for each further attempt.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Delay before attempt number `attempt` (1-based, so attempt 2 waits `backoff`).
    fn delay_before(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(2)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1500))
    }
}

/// A provider whose calls are retried according to a [`RetryPolicy`].
pub struct Retrying<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P: DataProvider> Retrying<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    fn call<T>(
        &self,
        what: &str,
        mut f: impl FnMut(&P) -> Result<T, DataError>,
    ) -> Result<T, DataError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match f(&self.inner) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    attempt += 1;
                    let delay = self.policy.delay_before(attempt);
                    tracing::debug!(
                        call = what,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient provider error, retrying"
                    );
                    std::thread::sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl<P: DataProvider> DataProvider for Retrying<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn list_instruments(&self) -> Result<Vec<Instrument>, DataError> {
        self.call("list_instruments", |p| p.list_instruments())
    }

    fn trade_calendar(&self, start: &str, end: &str) -> Result<Vec<CalendarDay>, DataError> {
        self.call("trade_calendar", |p| p.trade_calendar(start, end))
    }

    fn daily_prices(
        &self,
        instrument: &Instrument,
        start: &str,
        end: &str,
        adjust: Adjust,
    ) -> Result<DataFrame, DataError> {
        self.call("daily_prices", |p| p.daily_prices(instrument, start, end, adjust))
    }

    fn financial_statement(
        &self,
        instrument: &Instrument,
        kind: StatementKind,
        start: &str,
        end: &str,
    ) -> Result<DataFrame, DataError> {
        self.call("financial_statement", |p| {
            p.financial_statement(instrument, kind, start, end)
        })
    }
}
