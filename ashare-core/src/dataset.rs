//! Dataset catalogue: which tables exist, how they are keyed and partitioned,
//! and how their watermarks are named.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A time-partitioned record category stored under its own directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dataset {
    PriceDaily,
    BalanceSheet,
    IncomeStatement,
    CashflowStatement,
    FinaIndicator,
}

const PRICE_KEY: &[&str] = &["ts_code", "trade_date", "adjust"];
const STATEMENT_KEY: &[&str] = &["ts_code", "end_date"];

impl Dataset {
    /// Every dataset, in ingestion order.
    pub const ALL: [Dataset; 5] = [
        Dataset::PriceDaily,
        Dataset::BalanceSheet,
        Dataset::IncomeStatement,
        Dataset::CashflowStatement,
        Dataset::FinaIndicator,
    ];

    /// Statement datasets, in the fixed order they are ingested after prices.
    pub const STATEMENTS: [Dataset; 4] = [
        Dataset::BalanceSheet,
        Dataset::IncomeStatement,
        Dataset::CashflowStatement,
        Dataset::FinaIndicator,
    ];

    /// Identifier used for the directory name and the data watermark key.
    pub fn id(self) -> &'static str {
        match self {
            Dataset::PriceDaily => "price_daily",
            Dataset::BalanceSheet => "balance_sheet",
            Dataset::IncomeStatement => "income_statement",
            Dataset::CashflowStatement => "cashflow_statement",
            Dataset::FinaIndicator => "fina_indicator",
        }
    }

    /// Column whose first four characters select the yearly partition.
    pub fn partition_column(self) -> &'static str {
        match self {
            Dataset::PriceDaily => "trade_date",
            _ => "end_date",
        }
    }

    /// Columns identifying one logical record.
    pub fn natural_key(self) -> &'static [&'static str] {
        match self {
            Dataset::PriceDaily => PRICE_KEY,
            _ => STATEMENT_KEY,
        }
    }

    pub fn statement_kind(self) -> Option<StatementKind> {
        match self {
            Dataset::PriceDaily => None,
            Dataset::BalanceSheet => Some(StatementKind::BalanceSheet),
            Dataset::IncomeStatement => Some(StatementKind::IncomeStatement),
            Dataset::CashflowStatement => Some(StatementKind::CashflowStatement),
            Dataset::FinaIndicator => Some(StatementKind::FinancialIndicator),
        }
    }

    /// Watermark key tracking how many symbols of the universe this dataset
    /// has processed in `mode`.
    pub fn progress_key(self, mode: Mode) -> String {
        format!("{}_progress_{}", self.id(), mode.as_str())
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Dataset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Dataset::ALL
            .into_iter()
            .find(|d| d.id() == s)
            .ok_or_else(|| format!("unknown dataset '{s}'"))
    }
}

/// Ingestion mode. Each mode keeps its own progress watermarks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Backfill over an explicit date range.
    Full,
    /// Watermark-driven incremental range.
    Update,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Full => "full",
            Mode::Update => "update",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Mode::Full),
            "update" => Ok(Mode::Update),
            other => Err(format!("unknown mode '{other}' (expected full or update)")),
        }
    }
}

/// Financial statement families offered by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatementKind {
    BalanceSheet,
    IncomeStatement,
    CashflowStatement,
    FinancialIndicator,
}

/// Price adjustment flavour, stored verbatim in the `adjust` key column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Adjust {
    None,
    /// Forward-adjusted (前复权).
    Qfq,
    /// Backward-adjusted (后复权).
    Hfq,
}

impl Adjust {
    pub fn as_str(self) -> &'static str {
        match self {
            Adjust::None => "none",
            Adjust::Qfq => "qfq",
            Adjust::Hfq => "hfq",
        }
    }
}

impl FromStr for Adjust {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "none" | "" => Ok(Adjust::None),
            "qfq" => Ok(Adjust::Qfq),
            "hfq" => Ok(Adjust::Hfq),
            other => Err(format!("unknown price adjustment '{other}'")),
        }
    }
}
