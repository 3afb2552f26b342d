//! EastMoney kline provider, a price-only backend.
//!
//! Daily bars come straight from the quote history endpoint
//! (`GET {base}/api/qt/stock/kline/get`) that AKShare's `stock_zh_a_hist`
//! wraps. Each bar arrives as one comma-separated string. Listings,
//! calendars and statements are not served; route them to another provider
//! with [`super::route::PriceRouted`].

use super::columns::{restrict_to_window, with_constant, ColumnMap, Record};
use super::http;
use super::provider::{DataError, DataProvider};
use crate::dataset::{Adjust, StatementKind};
use crate::dates::normalize_date;
use crate::universe::{CalendarDay, Instrument};
use polars::prelude::*;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const KLINE_ENDPOINT: &str = "stock/kline/get";

/// Canonical names of the `f51..f61` kline fields, in wire order.
const KLINE_FIELDS: [&str; 11] = [
    "trade_date",
    "open",
    "close",
    "high",
    "low",
    "volume",
    "amount",
    "amplitude",
    "pct_chg",
    "change",
    "turnover",
];

const KLINE_COLUMNS: ColumnMap = ColumnMap {
    endpoint: KLINE_ENDPOINT,
    renames: &[],
    date_column: "trade_date",
};

#[derive(Debug, Deserialize)]
struct KlineResponse {
    data: Option<KlineData>,
}

#[derive(Debug, Deserialize)]
struct KlineData {
    #[serde(default)]
    klines: Vec<String>,
}

pub struct EastMoneyProvider {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl EastMoneyProvider {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, DataError> {
        Ok(Self {
            client: http::client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn kline_url(&self) -> String {
        format!("{}/api/qt/{KLINE_ENDPOINT}", self.base_url)
    }

    fn unsupported(&self, operation: &'static str) -> DataError {
        DataError::Unsupported {
            provider: self.name().to_string(),
            operation,
        }
    }
}

/// `{market}.{symbol}`: market 1 is Shanghai, 0 is Shenzhen.
fn secid(instrument: &Instrument) -> String {
    let market = if instrument.ts_code.ends_with(".SH") {
        "1"
    } else {
        "0"
    };
    format!("{market}.{}", instrument.symbol)
}

fn fqt(adjust: Adjust) -> &'static str {
    match adjust {
        Adjust::None => "0",
        Adjust::Qfq => "1",
        Adjust::Hfq => "2",
    }
}

/// Split kline strings into records keyed by canonical column names.
/// Non-numeric fields such as `-` become nulls.
fn kline_records(klines: &[String]) -> Result<Vec<Record>, DataError> {
    klines
        .iter()
        .map(|line| {
            let parts: Vec<&str> = line.split(',').collect();
            if parts.len() < KLINE_FIELDS.len() {
                return Err(DataError::ResponseFormatChanged(format!(
                    "{KLINE_ENDPOINT}: expected {} fields, got {} in '{line}'",
                    KLINE_FIELDS.len(),
                    parts.len()
                )));
            }
            let mut record = Record::new();
            record.insert(
                KLINE_FIELDS[0].to_string(),
                Value::String(parts[0].to_string()),
            );
            for (name, raw) in KLINE_FIELDS.iter().zip(&parts).skip(1) {
                let value = raw.trim().parse::<f64>().map_or(Value::Null, Value::from);
                record.insert(name.to_string(), value);
            }
            Ok(record)
        })
        .collect()
}

impl DataProvider for EastMoneyProvider {
    fn name(&self) -> &str {
        "eastmoney"
    }

    fn list_instruments(&self) -> Result<Vec<Instrument>, DataError> {
        Err(self.unsupported("list_instruments"))
    }

    fn trade_calendar(&self, _start: &str, _end: &str) -> Result<Vec<CalendarDay>, DataError> {
        Err(self.unsupported("trade_calendar"))
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
        let secid = secid(instrument);
        let params = [
            ("secid", secid.as_str()),
            ("fields1", "f1,f2,f3,f4,f5,f6"),
            ("fields2", "f51,f52,f53,f54,f55,f56,f57,f58,f59,f60,f61"),
            ("klt", "101"),
            ("fqt", fqt(adjust)),
            ("beg", start.as_str()),
            ("end", end.as_str()),
        ];
        let resp: KlineResponse =
            http::get_json(&self.client, &self.kline_url(), KLINE_ENDPOINT, &params)?;

        // Unknown or suspended symbols answer with `data: null`.
        let klines = resp.data.map(|d| d.klines).unwrap_or_default();
        let df = KLINE_COLUMNS.records_to_frame(&kline_records(&klines)?)?;
        let df = restrict_to_window(df, KLINE_COLUMNS.date_column, &start, &end)?;
        let df = with_constant(df, "ts_code", &instrument.ts_code)?;
        with_constant(df, "adjust", adjust.as_str())
    }

    fn financial_statement(
        &self,
        _instrument: &Instrument,
        _kind: StatementKind,
        _start: &str,
        _end: &str,
    ) -> Result<DataFrame, DataError> {
        Err(self.unsupported("financial_statement"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instrument(ts_code: &str) -> Instrument {
        Instrument {
            ts_code: ts_code.to_string(),
            symbol: ts_code[..6].to_string(),
            name: String::new(),
            exchange: String::new(),
            market: "主板".to_string(),
        }
    }

    #[test]
    fn secid_follows_exchange() {
        assert_eq!(secid(&instrument("600000.SH")), "1.600000");
        assert_eq!(secid(&instrument("000001.SZ")), "0.000001");
    }

    #[test]
    fn kline_strings_become_canonical_rows() {
        let body = r#"{"rc":0,"data":{"code":"600000","market":1,"klines":[
            "2023-01-03,7.23,7.30,7.35,7.20,123456,89012345.00,2.07,0.97,0.07,0.08",
            "2023-01-04,7.30,7.28,7.33,7.25,98765,71234567.00,1.10,-0.27,-0.02,-"
        ]}}"#;
        let resp: KlineResponse = serde_json::from_str(body).unwrap();
        let records = kline_records(&resp.data.unwrap().klines).unwrap();
        let df = KLINE_COLUMNS.records_to_frame(&records).unwrap();

        assert_eq!(df.height(), 2);
        let dates = df.column("trade_date").unwrap().str().unwrap();
        assert_eq!(dates.get(0), Some("20230103"));
        let close = df.column("close").unwrap().f64().unwrap();
        assert_eq!(close.get(1), Some(7.28));
        let turnover = df.column("turnover").unwrap().f64().unwrap();
        assert_eq!(turnover.get(1), None);
    }

    #[test]
    fn null_data_is_an_empty_response() {
        let resp: KlineResponse = serde_json::from_str(r#"{"rc":0,"data":null}"#).unwrap();
        assert!(resp.data.is_none());
    }

    #[test]
    fn short_kline_is_a_format_change() {
        let err = kline_records(&["2023-01-03,7.23".to_string()]).unwrap_err();
        assert!(matches!(err, DataError::ResponseFormatChanged(_)));
    }

    #[test]
    fn only_prices_are_served() {
        let provider =
            EastMoneyProvider::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        assert!(matches!(
            provider.list_instruments(),
            Err(DataError::Unsupported { .. })
        ));
        assert!(matches!(
            provider.financial_statement(
                &instrument("600000.SH"),
                StatementKind::BalanceSheet,
                "20230101",
                "20231231"
            ),
            Err(DataError::Unsupported { .. })
        ));
    }
}
