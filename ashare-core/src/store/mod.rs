//! Durable storage: yearly Parquet partitions per dataset and the SQLite
//! metadata database (watermarks, snapshots, failed fetches).

pub mod meta;
pub mod partition;

pub use meta::{FailureRecord, MetaStore};
pub use partition::{PartitionInfo, PartitionStore, UpsertReport};

use polars::prelude::PolarsError;
use std::path::PathBuf;
use thiserror::Error;

/// Storage failures. None of these are retried; they abort the run.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parquet error: {0}")]
    Parquet(#[from] PolarsError),

    #[error("metadata database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("batch has no '{column}' column")]
    MissingColumn { column: String },

    #[error("malformed date '{value}' in column '{column}'")]
    MalformedDate { column: String, value: String },

    #[error("watermark '{key}' holds unreadable marker '{marker}'")]
    CorruptMarker { key: String, marker: String },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> StoreError {
        let path = path.into();
        move |source| StoreError::Io { path, source }
    }
}
