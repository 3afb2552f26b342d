//! Main-board instrument universe and trading calendar rows.
//!
//! The universe is rebuilt from a fresh instrument snapshot on every run and
//! always iterated in `ts_code` order, so a progress index names the same
//! symbol across runs as long as the listing does not shrink.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Market label attached to every main-board instrument.
pub const MAIN_BOARD: &str = "主板";

const SH_MAIN_PREFIXES: [&str; 4] = ["600", "601", "603", "605"];
const SZ_MAIN_PREFIXES: [&str; 3] = ["000", "001", "002"];

/// A listed security, keyed by `ts_code` (e.g. `600000.SH`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub ts_code: String,
    /// Six-digit exchange code, zero padded.
    pub symbol: String,
    pub name: String,
    pub exchange: String,
    pub market: String,
}

/// One day of the trading calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarDay {
    /// `YYYYMMDD`.
    pub cal_date: String,
    pub is_open: bool,
}

/// Exchange a main-board code is listed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exchange {
    Shanghai,
    Shenzhen,
}

impl Exchange {
    pub fn suffix(self) -> &'static str {
        match self {
            Exchange::Shanghai => "SH",
            Exchange::Shenzhen => "SZ",
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Exchange::Shanghai => "SSE",
            Exchange::Shenzhen => "SZSE",
        }
    }

    fn main_board_prefixes(self) -> &'static [&'static str] {
        match self {
            Exchange::Shanghai => &SH_MAIN_PREFIXES,
            Exchange::Shenzhen => &SZ_MAIN_PREFIXES,
        }
    }
}

/// Zero-pad a numeric code to six digits.
fn pad_code(code: &str) -> String {
    format!("{:0>6}", code.trim())
}

/// Build an `Instrument` if `code` belongs to the main board of `exchange`.
pub fn main_board_instrument(code: &str, name: &str, exchange: Exchange) -> Option<Instrument> {
    let symbol = pad_code(code);
    if !exchange
        .main_board_prefixes()
        .iter()
        .any(|p| symbol.starts_with(p))
    {
        return None;
    }
    Some(Instrument {
        ts_code: format!("{symbol}.{}", exchange.suffix()),
        symbol,
        name: name.trim().to_string(),
        exchange: exchange.code().to_string(),
        market: MAIN_BOARD.to_string(),
    })
}

/// The sorted, de-duplicated set of instruments a run iterates over.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Universe {
    instruments: Vec<Instrument>,
}

impl Universe {
    /// Sort by `ts_code`; on duplicate codes the last listing wins.
    pub fn from_instruments(instruments: Vec<Instrument>) -> Self {
        let mut by_code: BTreeMap<String, Instrument> = BTreeMap::new();
        for inst in instruments {
            by_code.insert(inst.ts_code.clone(), inst);
        }
        Self {
            instruments: by_code.into_values().collect(),
        }
    }

    pub fn instruments(&self) -> &[Instrument] {
        &self.instruments
    }

    pub fn get(&self, ts_code: &str) -> Option<&Instrument> {
        self.instruments
            .binary_search_by(|i| i.ts_code.as_str().cmp(ts_code))
            .ok()
            .map(|idx| &self.instruments[idx])
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_board_filter_per_exchange() {
        assert!(main_board_instrument("600000", "浦发银行", Exchange::Shanghai).is_some());
        assert!(main_board_instrument("688001", "华兴源创", Exchange::Shanghai).is_none());
        assert!(main_board_instrument("1", "平安银行", Exchange::Shenzhen).is_some());
        assert!(main_board_instrument("300750", "宁德时代", Exchange::Shenzhen).is_none());
    }

    #[test]
    fn instrument_fields() {
        let inst = main_board_instrument("1", " 平安银行 ", Exchange::Shenzhen).unwrap();
        assert_eq!(inst.ts_code, "000001.SZ");
        assert_eq!(inst.symbol, "000001");
        assert_eq!(inst.name, "平安银行");
        assert_eq!(inst.exchange, "SZSE");
        assert_eq!(inst.market, MAIN_BOARD);
    }

    #[test]
    fn universe_is_sorted_and_deduplicated() {
        let a = main_board_instrument("600000", "old name", Exchange::Shanghai).unwrap();
        let b = main_board_instrument("000001", "平安银行", Exchange::Shenzhen).unwrap();
        let a2 = main_board_instrument("600000", "浦发银行", Exchange::Shanghai).unwrap();
        let universe = Universe::from_instruments(vec![a, b, a2]);

        let codes: Vec<&str> = universe
            .instruments()
            .iter()
            .map(|i| i.ts_code.as_str())
            .collect();
        assert_eq!(codes, vec!["000001.SZ", "600000.SH"]);
        assert!(!universe.is_empty());
        assert!(Universe::default().is_empty());
        assert_eq!(universe.get("600000.SH").unwrap().name, "浦发银行");
        assert!(universe.get("000002.SZ").is_none());
    }
}
