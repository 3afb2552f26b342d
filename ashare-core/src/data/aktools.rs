//! AkTools data provider.
//!
//! AkTools exposes AKShare functions over HTTP: `GET {base}/api/public/{function}`
//! with the function's keyword arguments as query parameters, answering with a
//! JSON array of records. This provider issues exactly one request per call;
//! retries and throttling are layered on top.

use super::columns::{
    restrict_to_window, with_constant, ColumnMap, Record, CALENDAR_COLUMNS, INDICATOR_COLUMNS,
    PRICE_COLUMNS, STATEMENT_COLUMNS,
};
use super::http;
use super::provider::{DataError, DataProvider};
use crate::dataset::{Adjust, StatementKind};
use crate::dates::normalize_date;
use crate::universe::{main_board_instrument, CalendarDay, Exchange, Instrument};
use polars::prelude::*;
use std::time::Duration;

/// Listing endpoint and the columns holding code and short name.
struct Listing {
    function: &'static str,
    params: &'static [(&'static str, &'static str)],
    exchange: Exchange,
    code_column: &'static str,
    name_column: &'static str,
    /// `(column, required value)` restricting rows to the main board.
    board_filter: Option<(&'static str, &'static str)>,
}

const LISTINGS: [Listing; 2] = [
    Listing {
        function: "stock_info_sh_name_code",
        params: &[("symbol", "主板A股")],
        exchange: Exchange::Shanghai,
        code_column: "证券代码",
        name_column: "证券简称",
        board_filter: None,
    },
    Listing {
        function: "stock_info_sz_name_code",
        params: &[("symbol", "A股列表")],
        exchange: Exchange::Shenzhen,
        code_column: "A股代码",
        name_column: "A股简称",
        board_filter: Some(("板块", "主板")),
    },
];

/// AkTools gateway provider.
pub struct AkToolsProvider {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl AkToolsProvider {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, DataError> {
        Ok(Self {
            client: http::client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint_url(&self, function: &str) -> String {
        format!("{}/api/public/{function}", self.base_url)
    }

    /// Call one AKShare function and decode its record array.
    fn get_records(
        &self,
        function: &str,
        params: &[(&str, &str)],
    ) -> Result<Vec<Record>, DataError> {
        http::get_json(&self.client, &self.endpoint_url(function), function, params)
    }

    fn listing(&self, listing: &Listing) -> Result<Vec<Instrument>, DataError> {
        let records = self.get_records(listing.function, listing.params)?;
        let mut instruments = Vec::with_capacity(records.len());
        for record in &records {
            if let Some((column, wanted)) = listing.board_filter {
                if record.get(column).and_then(|v| v.as_str()) != Some(wanted) {
                    continue;
                }
            }
            let code = text_field(record, listing.code_column).ok_or_else(|| {
                DataError::MissingColumn {
                    endpoint: listing.function.to_string(),
                    column: listing.code_column.to_string(),
                }
            })?;
            let name = text_field(record, listing.name_column).unwrap_or_default();
            if let Some(inst) = main_board_instrument(&code, &name, listing.exchange) {
                instruments.push(inst);
            }
        }
        Ok(instruments)
    }

    fn statement_frame(
        &self,
        map: &ColumnMap,
        params: &[(&str, &str)],
        instrument: &Instrument,
        start: &str,
        end: &str,
    ) -> Result<DataFrame, DataError> {
        let records = self.get_records(map.endpoint, params)?;
        let df = map.records_to_frame(&records)?;
        let df = restrict_to_window(df, map.date_column, start, end)?;
        with_constant(df, "ts_code", &instrument.ts_code)
    }
}

/// String form of a record field; numeric codes are rendered without quotes.
fn text_field(record: &Record, column: &str) -> Option<String> {
    match record.get(column)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn adjust_param(adjust: Adjust) -> &'static str {
    match adjust {
        Adjust::None => "",
        Adjust::Qfq => "qfq",
        Adjust::Hfq => "hfq",
    }
}

fn report_name(kind: StatementKind) -> &'static str {
    match kind {
        StatementKind::BalanceSheet => "资产负债表",
        StatementKind::IncomeStatement => "利润表",
        StatementKind::CashflowStatement => "现金流量表",
        StatementKind::FinancialIndicator => "",
    }
}

impl DataProvider for AkToolsProvider {
    fn name(&self) -> &str {
        "aktools"
    }

    fn list_instruments(&self) -> Result<Vec<Instrument>, DataError> {
        let mut all = Vec::new();
        for listing in &LISTINGS {
            all.extend(self.listing(listing)?);
        }
        Ok(all)
    }

    fn trade_calendar(&self, start: &str, end: &str) -> Result<Vec<CalendarDay>, DataError> {
        let records = self.get_records(CALENDAR_COLUMNS.endpoint, &[])?;
        let df = CALENDAR_COLUMNS.records_to_frame(&records)?;
        let df = restrict_to_window(df, CALENDAR_COLUMNS.date_column, start, end)?;
        if df.height() == 0 {
            return Ok(Vec::new());
        }
        let dates = df
            .column(CALENDAR_COLUMNS.date_column)
            .and_then(|c| c.str().cloned())
            .map_err(|e| DataError::ResponseFormatChanged(format!("calendar dates: {e}")))?;
        Ok(dates
            .into_iter()
            .flatten()
            .map(|d| CalendarDay {
                cal_date: d.to_string(),
                is_open: true,
            })
            .collect())
    }

    fn daily_prices(
        &self,
        instrument: &Instrument,
        start: &str,
        end: &str,
        adjust: Adjust,
    ) -> Result<DataFrame, DataError> {
        let start = normalize_date(start);
        let end = normalize_date(end);
        let params = [
            ("symbol", instrument.symbol.as_str()),
            ("period", "daily"),
            ("start_date", start.as_str()),
            ("end_date", end.as_str()),
            ("adjust", adjust_param(adjust)),
        ];
        let records = self.get_records(PRICE_COLUMNS.endpoint, &params)?;
        let df = PRICE_COLUMNS.records_to_frame(&records)?;
        let df = with_constant(df, "ts_code", &instrument.ts_code)?;
        with_constant(df, "adjust", adjust.as_str())
    }

    fn financial_statement(
        &self,
        instrument: &Instrument,
        kind: StatementKind,
        start: &str,
        end: &str,
    ) -> Result<DataFrame, DataError> {
        match kind {
            StatementKind::FinancialIndicator => {
                let start_year = normalize_date(start).chars().take(4).collect::<String>();
                let params = [
                    ("symbol", instrument.symbol.as_str()),
                    ("start_year", start_year.as_str()),
                ];
                self.statement_frame(&INDICATOR_COLUMNS, &params, instrument, start, end)
            }
            _ => {
                let stock = format!(
                    "{}{}",
                    instrument
                        .ts_code
                        .rsplit('.')
                        .next()
                        .unwrap_or_default()
                        .to_lowercase(),
                    instrument.symbol
                );
                let params = [("stock", stock.as_str()), ("symbol", report_name(kind))];
                self.statement_frame(&STATEMENT_COLUMNS, &params, instrument, start, end)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_url_strips_trailing_slash() {
        let provider =
            AkToolsProvider::new("http://127.0.0.1:8080/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            provider.endpoint_url("stock_zh_a_hist"),
            "http://127.0.0.1:8080/api/public/stock_zh_a_hist"
        );
    }

    #[test]
    fn unreachable_gateway_is_transient() {
        // Port 9 (discard) is closed on any sane test host.
        let provider =
            AkToolsProvider::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = provider.list_instruments().unwrap_err();
        assert!(err.is_transient(), "expected transient error, got {err:?}");
    }

    #[test]
    fn text_field_renders_numbers() {
        let record: Record =
            serde_json::from_str(r#"{"A股代码": 1, "A股简称": "平安银行"}"#).unwrap();
        assert_eq!(text_field(&record, "A股代码").as_deref(), Some("1"));
        assert_eq!(text_field(&record, "missing"), None);
    }

    #[test]
    fn statement_report_names() {
        assert_eq!(report_name(StatementKind::BalanceSheet), "资产负债表");
        assert_eq!(report_name(StatementKind::CashflowStatement), "现金流量表");
        assert_eq!(adjust_param(Adjust::None), "");
    }
}
