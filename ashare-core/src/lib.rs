//! A-share core: dataset catalogue, instrument universe, provider adapters,
//! the year-partitioned Parquet merge-store and the SQLite metadata store.
//!
//! Everything here is synchronous; orchestration lives in `ashare-runner`.

pub mod data;
pub mod dataset;
pub mod dates;
pub mod store;
pub mod universe;

pub use dataset::{Adjust, Dataset, Mode, StatementKind};
pub use universe::{CalendarDay, Instrument, Universe};

#[cfg(test)]
mod tests {
    use super::*;

    /// Provider implementations are shared behind `&dyn DataProvider`.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<data::AkToolsProvider>();
        require_sync::<data::AkToolsProvider>();
        require_send::<data::Retrying<data::AkToolsProvider>>();
        require_sync::<data::Retrying<data::AkToolsProvider>>();
        require_send::<Universe>();
        require_sync::<Universe>();
    }

    #[test]
    fn dataset_ids_are_unique() {
        let mut ids: Vec<&str> = Dataset::ALL.iter().map(|d| d.id()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), Dataset::ALL.len());
    }
}
