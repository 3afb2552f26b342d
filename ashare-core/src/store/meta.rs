//! SQLite metadata database.
//!
//! Holds three kinds of state:
//! - watermarks (`meta_updates`): data watermarks keyed by dataset id and
//!   progress watermarks keyed by `{dataset}_progress_{mode}`;
//! - instrument and calendar snapshots, replaced wholesale on every run;
//! - the failed-fetch ledger consumed by `retry-failed`.
//!
//! Every write commits on its own, so a killed process loses at most the
//! statement in flight.

use super::StoreError;
use crate::dataset::{Dataset, Mode};
use crate::universe::{CalendarDay, Instrument};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

const CREATE_TABLES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS meta_updates (
    dataset_id TEXT PRIMARY KEY,
    marker TEXT
);

CREATE TABLE IF NOT EXISTS stock_basic (
    ts_code TEXT PRIMARY KEY,
    symbol TEXT NOT NULL,
    name TEXT NOT NULL,
    exchange TEXT NOT NULL,
    market TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS trade_calendar (
    cal_date TEXT PRIMARY KEY,
    is_open INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS fetch_failures (
    dataset TEXT NOT NULL,
    mode TEXT NOT NULL,
    ts_code TEXT NOT NULL,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    error TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 1,
    recorded_at TEXT NOT NULL,
    PRIMARY KEY (dataset, mode, ts_code)
);
"#;

/// A symbol whose fetch failed, with the window that was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub dataset: Dataset,
    pub mode: Mode,
    pub ts_code: String,
    pub start_date: String,
    pub end_date: String,
    pub error: String,
    pub attempts: u32,
}

pub struct MetaStore {
    conn: Connection,
}

impl MetaStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(CREATE_TABLES_SQL)?;
        Ok(Self { conn })
    }

    // ── Watermarks ──────────────────────────────────────────────────

    pub fn get_watermark(&self, dataset_id: &str) -> Result<Option<String>, StoreError> {
        let marker = self
            .conn
            .query_row(
                "SELECT marker FROM meta_updates WHERE dataset_id = ?1",
                params![dataset_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(marker.flatten())
    }

    pub fn set_watermark(&self, dataset_id: &str, marker: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO meta_updates (dataset_id, marker) VALUES (?1, ?2)
             ON CONFLICT(dataset_id) DO UPDATE SET marker = excluded.marker",
            params![dataset_id, marker],
        )?;
        Ok(())
    }

    /// Store `candidate` unless the current marker is already later.
    /// Returns the marker in effect afterwards.
    pub fn raise_watermark(&self, dataset_id: &str, candidate: &str) -> Result<String, StoreError> {
        match self.get_watermark(dataset_id)? {
            Some(current) if current.as_str() >= candidate => Ok(current),
            _ => {
                self.set_watermark(dataset_id, candidate)?;
                Ok(candidate.to_string())
            }
        }
    }

    /// Index of the next symbol to process for `(dataset, mode)`; 0 when unset.
    pub fn progress(&self, dataset: Dataset, mode: Mode) -> Result<usize, StoreError> {
        let key = dataset.progress_key(mode);
        match self.get_watermark(&key)? {
            None => Ok(0),
            Some(marker) => marker
                .trim()
                .parse()
                .map_err(|_| StoreError::CorruptMarker { key, marker }),
        }
    }

    pub fn set_progress(&self, dataset: Dataset, mode: Mode, next: usize) -> Result<(), StoreError> {
        self.set_watermark(&dataset.progress_key(mode), &next.to_string())
    }

    /// Every watermark, ordered by key.
    pub fn list_watermarks(&self) -> Result<Vec<(String, String)>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT dataset_id, COALESCE(marker, '') FROM meta_updates ORDER BY dataset_id")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete progress watermarks of `mode`, for one dataset or all of them.
    /// Returns how many were removed.
    pub fn clear_progress(&self, mode: Mode, dataset: Option<Dataset>) -> Result<usize, StoreError> {
        let datasets: Vec<Dataset> = match dataset {
            Some(d) => vec![d],
            None => Dataset::ALL.to_vec(),
        };
        let mut removed = 0;
        for d in datasets {
            removed += self.conn.execute(
                "DELETE FROM meta_updates WHERE dataset_id = ?1",
                params![d.progress_key(mode)],
            )?;
        }
        Ok(removed)
    }

    // ── Snapshots ───────────────────────────────────────────────────

    pub fn replace_instruments(&mut self, instruments: &[Instrument]) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM stock_basic", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO stock_basic (ts_code, symbol, name, exchange, market)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for inst in instruments {
                stmt.execute(params![
                    inst.ts_code,
                    inst.symbol,
                    inst.name,
                    inst.exchange,
                    inst.market
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// The instrument snapshot, ordered by `ts_code`.
    pub fn load_instruments(&self) -> Result<Vec<Instrument>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT ts_code, symbol, name, exchange, market FROM stock_basic ORDER BY ts_code",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Instrument {
                    ts_code: row.get(0)?,
                    symbol: row.get(1)?,
                    name: row.get(2)?,
                    exchange: row.get(3)?,
                    market: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn replace_calendar(&mut self, days: &[CalendarDay]) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM trade_calendar", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO trade_calendar (cal_date, is_open) VALUES (?1, ?2)",
            )?;
            for day in days {
                stmt.execute(params![day.cal_date, day.is_open])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn instrument_count(&self) -> Result<usize, StoreError> {
        self.count("SELECT COUNT(*) FROM stock_basic")
    }

    pub fn calendar_count(&self) -> Result<usize, StoreError> {
        self.count("SELECT COUNT(*) FROM trade_calendar WHERE is_open = 1")
    }

    fn count(&self, sql: &str) -> Result<usize, StoreError> {
        let n: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(n.max(0) as usize)
    }

    // ── Failed fetches ──────────────────────────────────────────────

    /// Record (or refresh) a failed fetch. Repeated failures of the same key
    /// bump `attempts` and keep the widest window seen.
    pub fn record_failure(
        &self,
        dataset: Dataset,
        mode: Mode,
        ts_code: &str,
        start: &str,
        end: &str,
        error: &str,
    ) -> Result<(), StoreError> {
        let now = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO fetch_failures (dataset, mode, ts_code, start_date, end_date, error, attempts, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)
             ON CONFLICT(dataset, mode, ts_code) DO UPDATE SET
                 start_date = MIN(start_date, excluded.start_date),
                 end_date = MAX(end_date, excluded.end_date),
                 error = excluded.error,
                 attempts = attempts + 1,
                 recorded_at = excluded.recorded_at",
            params![dataset.id(), mode.as_str(), ts_code, start, end, error, now],
        )?;
        Ok(())
    }

    /// Drop the failure of this key if `[start, end]` covers its recorded
    /// window. A narrower or disjoint success leaves the entry in place.
    pub fn clear_failure(
        &self,
        dataset: Dataset,
        mode: Mode,
        ts_code: &str,
        start: &str,
        end: &str,
    ) -> Result<bool, StoreError> {
        let n = self.conn.execute(
            "DELETE FROM fetch_failures
             WHERE dataset = ?1 AND mode = ?2 AND ts_code = ?3
               AND start_date >= ?4 AND end_date <= ?5",
            params![dataset.id(), mode.as_str(), ts_code, start, end],
        )?;
        Ok(n > 0)
    }

    /// Every recorded failure, in ingestion order of datasets then `ts_code`.
    pub fn list_failures(&self) -> Result<Vec<FailureRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT dataset, mode, ts_code, start_date, end_date, error, attempts
             FROM fetch_failures",
        )?;
        let raw = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, i64>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = Vec::with_capacity(raw.len());
        for (dataset, mode, ts_code, start_date, end_date, error, attempts) in raw {
            let key = format!("fetch_failures/{ts_code}");
            let dataset = dataset.parse::<Dataset>().map_err(|_| StoreError::CorruptMarker {
                key: key.clone(),
                marker: dataset.clone(),
            })?;
            let mode = mode
                .parse::<Mode>()
                .map_err(|_| StoreError::CorruptMarker { key, marker: mode.clone() })?;
            out.push(FailureRecord {
                dataset,
                mode,
                ts_code,
                start_date,
                end_date,
                error,
                attempts: attempts.max(0) as u32,
            });
        }
        out.sort_by(|a, b| {
            (a.dataset, a.mode.as_str(), &a.ts_code).cmp(&(b.dataset, b.mode.as_str(), &b.ts_code))
        });
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inst(ts_code: &str) -> Instrument {
        Instrument {
            ts_code: ts_code.into(),
            symbol: ts_code[..6].into(),
            name: String::new(),
            exchange: "SZSE".into(),
            market: "主板".into(),
        }
    }

    #[test]
    fn watermark_absent_then_upserted() {
        let store = MetaStore::open_in_memory().unwrap();
        assert_eq!(store.get_watermark("price_daily").unwrap(), None);

        store.set_watermark("price_daily", "20230103").unwrap();
        store.set_watermark("price_daily", "20230104").unwrap();
        assert_eq!(
            store.get_watermark("price_daily").unwrap().as_deref(),
            Some("20230104")
        );
        assert_eq!(store.list_watermarks().unwrap().len(), 1);
    }

    #[test]
    fn raise_never_lowers() {
        let store = MetaStore::open_in_memory().unwrap();
        assert_eq!(store.raise_watermark("x", "20230104").unwrap(), "20230104");
        assert_eq!(store.raise_watermark("x", "20230101").unwrap(), "20230104");
        assert_eq!(store.raise_watermark("x", "20230201").unwrap(), "20230201");
    }

    #[test]
    fn progress_defaults_to_zero_and_rejects_garbage() {
        let store = MetaStore::open_in_memory().unwrap();
        assert_eq!(store.progress(Dataset::PriceDaily, Mode::Full).unwrap(), 0);

        store.set_progress(Dataset::PriceDaily, Mode::Full, 7).unwrap();
        assert_eq!(store.progress(Dataset::PriceDaily, Mode::Full).unwrap(), 7);
        assert_eq!(store.progress(Dataset::PriceDaily, Mode::Update).unwrap(), 0);

        store
            .set_watermark("balance_sheet_progress_full", "abc")
            .unwrap();
        assert!(matches!(
            store.progress(Dataset::BalanceSheet, Mode::Full),
            Err(StoreError::CorruptMarker { .. })
        ));
    }

    #[test]
    fn clear_progress_leaves_data_watermarks() {
        let store = MetaStore::open_in_memory().unwrap();
        store.set_watermark("price_daily", "20230104").unwrap();
        store.set_progress(Dataset::PriceDaily, Mode::Full, 2).unwrap();
        store.set_progress(Dataset::BalanceSheet, Mode::Full, 2).unwrap();
        store.set_progress(Dataset::PriceDaily, Mode::Update, 2).unwrap();

        assert_eq!(store.clear_progress(Mode::Full, None).unwrap(), 2);
        assert_eq!(store.progress(Dataset::PriceDaily, Mode::Update).unwrap(), 2);
        assert!(store.get_watermark("price_daily").unwrap().is_some());
    }

    #[test]
    fn snapshots_are_replaced_wholesale() {
        let mut store = MetaStore::open_in_memory().unwrap();
        store
            .replace_instruments(&[inst("600000.SH"), inst("000001.SZ")])
            .unwrap();
        store.replace_instruments(&[inst("000002.SZ")]).unwrap();

        let loaded = store.load_instruments().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].ts_code, "000002.SZ");

        store
            .replace_calendar(&[
                CalendarDay {
                    cal_date: "20230103".into(),
                    is_open: true,
                },
                CalendarDay {
                    cal_date: "20230104".into(),
                    is_open: true,
                },
            ])
            .unwrap();
        assert_eq!(store.calendar_count().unwrap(), 2);
    }

    #[test]
    fn failure_ledger_roundtrip() {
        let store = MetaStore::open_in_memory().unwrap();
        store
            .record_failure(Dataset::PriceDaily, Mode::Update, "000001.SZ", "20230105", "20230110", "timeout")
            .unwrap();
        store
            .record_failure(Dataset::PriceDaily, Mode::Update, "000001.SZ", "20230103", "20230110", "502")
            .unwrap();

        let failures = store.list_failures().unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].attempts, 2);
        assert_eq!(failures[0].start_date, "20230103");
        assert_eq!(failures[0].error, "502");

        assert!(store
            .clear_failure(Dataset::PriceDaily, Mode::Update, "000001.SZ", "20230103", "20230110")
            .unwrap());
        assert!(store.list_failures().unwrap().is_empty());
    }

    #[test]
    fn failure_survives_success_on_a_window_that_does_not_cover_it() {
        let store = MetaStore::open_in_memory().unwrap();
        store
            .record_failure(Dataset::PriceDaily, Mode::Full, "600000.SH", "20230101", "20230131", "timeout")
            .unwrap();

        // disjoint
        assert!(!store
            .clear_failure(Dataset::PriceDaily, Mode::Full, "600000.SH", "20230601", "20230630")
            .unwrap());
        // overlapping but narrower
        assert!(!store
            .clear_failure(Dataset::PriceDaily, Mode::Full, "600000.SH", "20230110", "20230630")
            .unwrap());
        // other mode
        assert!(!store
            .clear_failure(Dataset::PriceDaily, Mode::Update, "600000.SH", "20220101", "20231231")
            .unwrap());
        assert_eq!(store.list_failures().unwrap().len(), 1);

        assert!(store
            .clear_failure(Dataset::PriceDaily, Mode::Full, "600000.SH", "20221201", "20230131")
            .unwrap());
        assert!(store.list_failures().unwrap().is_empty());
    }

    #[test]
    fn file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.db");
        {
            let store = MetaStore::open(&path).unwrap();
            store.set_watermark("fina_indicator", "20221231").unwrap();
        }
        let store = MetaStore::open(&path).unwrap();
        assert_eq!(
            store.get_watermark("fina_indicator").unwrap().as_deref(),
            Some("20221231")
        );
    }
}
