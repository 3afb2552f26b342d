//! Year-partitioned Parquet merge-store.
//!
//! Layout: `{dataset_dir}/{year}.parquet`
//!
//! Every upsert rewrites the touched years as the deduplicated, key-sorted
//! union of what was on disk and the incoming batch. Incoming rows replace
//! stored rows with the same natural key. Writes go to `.parquet.tmp` first
//! and are renamed into place, so a crash never leaves a half-written year.

use super::StoreError;
use crate::dates::partition_year;
use polars::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

/// Outcome of one upsert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertReport {
    /// Rows in the incoming batch.
    pub rows_in: usize,
    /// Years rewritten, ascending.
    pub years: Vec<String>,
    /// Largest partition date in the batch.
    pub max_date: Option<String>,
}

/// One partition file as seen by `status`.
#[derive(Debug, Clone)]
pub struct PartitionInfo {
    pub year: String,
    pub path: PathBuf,
    pub rows: usize,
    /// BLAKE3 of the file bytes.
    pub digest: String,
}

pub struct PartitionStore {
    dir: PathBuf,
}

impl PartitionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn year_path(&self, year: &str) -> PathBuf {
        self.dir.join(format!("{year}.parquet"))
    }

    /// Merge `batch` into the yearly partitions selected by `partition_column`.
    ///
    /// An empty batch is a no-op. On error, years already rewritten stay
    /// committed.
    pub fn upsert(
        &self,
        batch: &DataFrame,
        partition_column: &str,
        keys: &[&str],
    ) -> Result<UpsertReport, StoreError> {
        if batch.height() == 0 {
            return Ok(UpsertReport::default());
        }
        for column in keys.iter().chain(std::iter::once(&partition_column)) {
            if batch.column(column).is_err() {
                return Err(StoreError::MissingColumn {
                    column: column.to_string(),
                });
            }
        }

        let dates = batch.column(partition_column)?.cast(&DataType::String)?;
        let dates = dates.str()?;

        // year -> row mask
        let mut masks: BTreeMap<String, Vec<bool>> = BTreeMap::new();
        let mut max_date: Option<&str> = None;
        for (row, date) in dates.into_iter().enumerate() {
            let date = date.unwrap_or_default();
            let year = partition_year(date).ok_or_else(|| StoreError::MalformedDate {
                column: partition_column.to_string(),
                value: date.to_string(),
            })?;
            masks
                .entry(year.to_string())
                .or_insert_with(|| vec![false; batch.height()])[row] = true;
            if max_date.map_or(true, |m| date > m) {
                max_date = Some(date);
            }
        }

        fs::create_dir_all(&self.dir).map_err(StoreError::io(&self.dir))?;

        for (year, flags) in &masks {
            let mask = BooleanChunked::from_slice("partition".into(), flags);
            let incoming = batch.filter(&mask)?;
            let merged = match self.load_year(year)? {
                Some(existing) => merge(vec![existing, incoming], keys)?,
                None => merge(vec![incoming], keys)?,
            };
            self.write_year(year, merged)?;
            tracing::trace!(dir = %self.dir.display(), year, "partition rewritten");
        }

        Ok(UpsertReport {
            rows_in: batch.height(),
            years: masks.into_keys().collect(),
            max_date: max_date.map(str::to_string),
        })
    }

    /// Contents of one year, or `None` when the partition does not exist.
    pub fn load_year(&self, year: &str) -> Result<Option<DataFrame>, StoreError> {
        let path = self.year_path(year);
        if !path.exists() {
            return Ok(None);
        }
        let file = fs::File::open(&path).map_err(StoreError::io(&path))?;
        let df = ParquetReader::new(file).finish()?;
        Ok(Some(df))
    }

    /// Years with a partition file, ascending.
    pub fn years(&self) -> Result<Vec<String>, StoreError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut years = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(StoreError::io(&self.dir))? {
            let path = entry.map_err(StoreError::io(&self.dir))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if stem.len() == 4 && partition_year(stem).is_some() {
                    years.push(stem.to_string());
                }
            }
        }
        years.sort();
        Ok(years)
    }

    /// Row count and digest of every partition file.
    pub fn partitions(&self) -> Result<Vec<PartitionInfo>, StoreError> {
        let mut out = Vec::new();
        for year in self.years()? {
            let path = self.year_path(&year);
            let bytes = fs::read(&path).map_err(StoreError::io(&path))?;
            let digest = blake3::hash(&bytes).to_hex().to_string();
            let rows = self.load_year(&year)?.map_or(0, |df| df.height());
            out.push(PartitionInfo {
                year,
                path,
                rows,
                digest,
            });
        }
        Ok(out)
    }

    fn write_year(&self, year: &str, mut df: DataFrame) -> Result<(), StoreError> {
        let path = self.year_path(year);
        let tmp_path = path.with_extension("parquet.tmp");

        let file = fs::File::create(&tmp_path).map_err(StoreError::io(&tmp_path))?;
        ParquetWriter::new(file).finish(&mut df)?;

        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            StoreError::Io {
                path: path.clone(),
                source: e,
            }
        })
    }
}

/// Concatenate `frames` in order, keep the last row per key and sort by key.
fn merge(frames: Vec<DataFrame>, keys: &[&str]) -> Result<DataFrame, StoreError> {
    let lazy: Vec<LazyFrame> = frames.into_iter().map(|df| df.lazy()).collect();
    let df = concat_lf_diagonal(
        lazy,
        UnionArgs {
            to_supertypes: true,
            ..Default::default()
        },
    )?
    .unique_stable(
        Some(keys.iter().map(|k| (*k).into()).collect()),
        UniqueKeepStrategy::Last,
    )
    .sort(
        keys.to_vec(),
        SortMultipleOptions::default().with_maintain_order(true),
    )
    .collect()?;
    Ok(df)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prices(rows: &[(&str, &str, f64)]) -> DataFrame {
        let codes: Vec<&str> = rows.iter().map(|r| r.0).collect();
        let dates: Vec<&str> = rows.iter().map(|r| r.1).collect();
        let closes: Vec<f64> = rows.iter().map(|r| r.2).collect();
        df!(
            "ts_code" => codes,
            "trade_date" => dates,
            "adjust" => vec!["none"; rows.len()],
            "close" => closes
        )
        .unwrap()
    }

    const KEYS: &[&str] = &["ts_code", "trade_date", "adjust"];

    #[test]
    fn empty_batch_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionStore::new(dir.path().join("price_daily"));
        let report = store
            .upsert(&prices(&[]), "trade_date", KEYS)
            .unwrap();
        assert_eq!(report, UpsertReport::default());
        assert!(store.years().unwrap().is_empty());
    }

    #[test]
    fn splits_batch_by_year() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionStore::new(dir.path());
        let report = store
            .upsert(
                &prices(&[
                    ("000001.SZ", "20221230", 1.0),
                    ("000001.SZ", "20230103", 2.0),
                    ("600000.SH", "20230104", 3.0),
                ]),
                "trade_date",
                KEYS,
            )
            .unwrap();

        assert_eq!(report.years, vec!["2022", "2023"]);
        assert_eq!(report.max_date.as_deref(), Some("20230104"));
        assert_eq!(store.load_year("2022").unwrap().unwrap().height(), 1);
        assert_eq!(store.load_year("2023").unwrap().unwrap().height(), 2);
        assert!(!store.year_path("2023").with_extension("parquet.tmp").exists());
    }

    #[test]
    fn incoming_row_replaces_stored_row() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionStore::new(dir.path());
        store
            .upsert(&prices(&[("000001.SZ", "20230103", 1.0)]), "trade_date", KEYS)
            .unwrap();
        store
            .upsert(&prices(&[("000001.SZ", "20230103", 9.5)]), "trade_date", KEYS)
            .unwrap();

        let df = store.load_year("2023").unwrap().unwrap();
        assert_eq!(df.height(), 1);
        let close = df.column("close").unwrap().f64().unwrap().get(0);
        assert_eq!(close, Some(9.5));
    }

    #[test]
    fn missing_key_column_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionStore::new(dir.path());
        let batch = df!("ts_code" => ["000001.SZ"], "trade_date" => ["20230103"]).unwrap();
        let err = store.upsert(&batch, "trade_date", KEYS).unwrap_err();
        assert!(matches!(err, StoreError::MissingColumn { column } if column == "adjust"));
    }

    #[test]
    fn malformed_partition_date_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionStore::new(dir.path());
        let err = store
            .upsert(&prices(&[("000001.SZ", "n/a", 1.0)]), "trade_date", KEYS)
            .unwrap_err();
        assert!(matches!(err, StoreError::MalformedDate { .. }));
    }

    #[test]
    fn partitions_report_rows_and_digest() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionStore::new(dir.path());
        store
            .upsert(
                &prices(&[("000001.SZ", "20230103", 1.0), ("000002.SZ", "20230103", 1.0)]),
                "trade_date",
                KEYS,
            )
            .unwrap();

        let parts = store.partitions().unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].year, "2023");
        assert_eq!(parts[0].rows, 2);
        assert_eq!(parts[0].digest.len(), 64);
    }
}
