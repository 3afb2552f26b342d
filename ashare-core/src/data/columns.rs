//! Provider column mapping and JSON-records → DataFrame conversion.
//!
//! Each endpoint gets an explicit table from provider column names to
//! canonical ones. The table is applied once, when a response becomes a
//! DataFrame, so nothing downstream ever sees provider naming.

use super::provider::DataError;
use crate::dates::{normalize_date, parse_date};
use polars::prelude::*;
use serde_json::{Map, Value};
use std::collections::HashSet;

/// A JSON object as returned by record-oriented endpoints.
pub type Record = Map<String, Value>;

/// Column-renaming table for one endpoint family.
#[derive(Debug, Clone, Copy)]
pub struct ColumnMap {
    pub endpoint: &'static str,
    /// `(provider name, canonical name)` pairs. Several provider names may map
    /// to the same canonical column; the first one present in a response wins.
    pub renames: &'static [(&'static str, &'static str)],
    /// Canonical date column, normalized to `YYYYMMDD`. Rows without a valid
    /// date are dropped.
    pub date_column: &'static str,
}

pub const PRICE_COLUMNS: ColumnMap = ColumnMap {
    endpoint: "stock_zh_a_hist",
    renames: &[
        ("日期", "trade_date"),
        ("date", "trade_date"),
        ("开盘", "open"),
        ("收盘", "close"),
        ("最高", "high"),
        ("最低", "low"),
        ("成交量", "volume"),
        ("成交额", "amount"),
        ("振幅", "amplitude"),
        ("涨跌幅", "pct_chg"),
        ("涨跌额", "change"),
        ("换手率", "turnover"),
        ("股票代码", "code"),
    ],
    date_column: "trade_date",
};

pub const STATEMENT_COLUMNS: ColumnMap = ColumnMap {
    endpoint: "stock_financial_report_sina",
    renames: &[
        ("报告日", "end_date"),
        ("报表日期", "end_date"),
        ("截止日期", "end_date"),
        ("报告期", "end_date"),
    ],
    date_column: "end_date",
};

pub const INDICATOR_COLUMNS: ColumnMap = ColumnMap {
    endpoint: "stock_financial_analysis_indicator",
    renames: &[
        ("日期", "end_date"),
        ("报表日期", "end_date"),
        ("截止日期", "end_date"),
        ("报告期", "end_date"),
    ],
    date_column: "end_date",
};

pub const CALENDAR_COLUMNS: ColumnMap = ColumnMap {
    endpoint: "tool_trade_date_hist_sina",
    renames: &[
        ("trade_date", "cal_date"),
        ("交易日期", "cal_date"),
        ("日期", "cal_date"),
    ],
    date_column: "cal_date",
};

impl ColumnMap {
    /// Canonical name for a provider column (unmapped names pass through).
    pub fn canonical<'a>(&self, source: &'a str) -> &'a str {
        self.renames
            .iter()
            .find(|(from, _)| *from == source)
            .map(|(_, to)| *to)
            .unwrap_or(source)
    }

    /// Build a canonical DataFrame from JSON records.
    ///
    /// Columns whose non-null values are all numbers become `Float64`; every
    /// other column is stored as strings. An empty response yields an empty
    /// frame; a non-empty response without the date column is an error.
    pub fn records_to_frame(&self, records: &[Record]) -> Result<DataFrame, DataError> {
        if records.is_empty() {
            return Ok(DataFrame::empty());
        }

        // (source name, canonical name) in first-seen order, one source per canonical column
        let mut layout: Vec<(String, &str)> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for record in records {
            for key in record.keys() {
                let canonical = self.canonical(key);
                if seen.insert(canonical.to_string()) {
                    layout.push((key.clone(), canonical));
                }
            }
        }

        let date_source = layout
            .iter()
            .find(|(_, canonical)| *canonical == self.date_column)
            .map(|(source, _)| source.clone())
            .ok_or_else(|| DataError::MissingColumn {
                endpoint: self.endpoint.to_string(),
                column: self.date_column.to_string(),
            })?;

        let rows: Vec<&Record> = records
            .iter()
            .filter(|r| {
                r.get(&date_source)
                    .and_then(value_as_text)
                    .and_then(|d| parse_date(&d))
                    .is_some()
            })
            .collect();
        let dropped = records.len() - rows.len();
        if dropped > 0 {
            tracing::debug!(
                endpoint = self.endpoint,
                dropped,
                "dropped rows without a valid date"
            );
        }

        let mut columns = Vec::with_capacity(layout.len());
        for (source, canonical) in &layout {
            let values: Vec<&Value> = rows
                .iter()
                .map(|r| r.get(source).unwrap_or(&Value::Null))
                .collect();
            let column = if *canonical == self.date_column {
                let dates: Vec<Option<String>> = values
                    .iter()
                    .map(|v| value_as_text(v).map(|d| normalize_date(&d)))
                    .collect();
                Column::new((*canonical).into(), dates)
            } else if is_numeric(&values) {
                let nums: Vec<Option<f64>> = values.iter().map(|v| v.as_f64()).collect();
                Column::new((*canonical).into(), nums)
            } else {
                let texts: Vec<Option<String>> =
                    values.iter().map(|v| value_as_text(v)).collect();
                Column::new((*canonical).into(), texts)
            };
            columns.push(column);
        }

        DataFrame::new(columns).map_err(|e| {
            DataError::ResponseFormatChanged(format!("{}: dataframe creation: {e}", self.endpoint))
        })
    }
}

/// True when every non-null value is a JSON number (and at least one exists).
fn is_numeric(values: &[&Value]) -> bool {
    let mut any = false;
    for v in values {
        match v {
            Value::Null => {}
            Value::Number(_) => any = true,
            _ => return false,
        }
    }
    any
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Append a column holding `value` on every row.
pub fn with_constant(mut df: DataFrame, name: &str, value: &str) -> Result<DataFrame, DataError> {
    let column = Column::new(name.into(), vec![value; df.height()]);
    df.with_column(column)
        .map_err(|e| DataError::Other(format!("add column '{name}': {e}")))?;
    Ok(df)
}

/// Keep rows whose `column` (a `YYYYMMDD` string) lies within `[start, end]`.
pub fn restrict_to_window(
    df: DataFrame,
    column: &str,
    start: &str,
    end: &str,
) -> Result<DataFrame, DataError> {
    if df.height() == 0 {
        return Ok(df);
    }
    let map_err = |e: PolarsError| DataError::Other(format!("filter on '{column}': {e}"));
    let start = normalize_date(start);
    let end = normalize_date(end);
    let dates = df.column(column).map_err(map_err)?.str().map_err(map_err)?;
    let flags: Vec<bool> = dates
        .into_iter()
        .map(|d| d.is_some_and(|d| d >= start.as_str() && d <= end.as_str()))
        .collect();
    let mask = BooleanChunked::from_slice("window".into(), &flags);
    df.filter(&mask).map_err(map_err)
}
