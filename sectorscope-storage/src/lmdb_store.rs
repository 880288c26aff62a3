//! LMDB-backed persistent store.
//!
//! Uses heed (Rust bindings for LMDB). The environment holds four named
//! databases:
//!
//! | Database     | Key                 | Value                       |
//! |--------------|---------------------|-----------------------------|
//! | `snapshots`  | batch id            | [`SnapshotBatch`] (JSON)    |
//! | `statistics` | sequence (u64, BE)  | [`StoredStatistics`] (JSON) |
//! | `history`    | sequence (u64, BE)  | [`HistoryEntry`] (JSON)     |
//! | `meta`       | pointer name        | batch id or sequence        |
//!
//! Every save writes its payload and moves the matching `meta` pointer in one
//! write transaction, so a reader sees either the previous or the new latest
//! value and never a half-written one.
//!
//! LMDB calls block, so each operation runs on `spawn_blocking`.

use std::collections::BTreeSet;
use std::path::Path;

use async_trait::async_trait;
use heed::byteorder::BigEndian;
use heed::types::{SerdeJson, Str, U64};
use heed::{Database, Env, EnvOpenOptions, RoTxn};
use sectorscope_core::{
    Layer, PersistenceError, SnapshotBatch, StatisticsTable, StorageConfig, Timestamp,
};

use crate::{HistoryEntry, PersistentStore, StoredStatistics};

const LATEST_BATCH_KEY: &str = "latest_batch";
const LATEST_STATISTICS_KEY: &str = "latest_statistics";

type SequenceKey = U64<BigEndian>;

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open a named database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    /// A stored payload or pointer could not be decoded.
    #[error("Corrupt entry: {0}")]
    Corrupt(String),

    /// The blocking task running the operation panicked or was cancelled.
    #[error("Blocking task failed: {0}")]
    Task(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<heed::Error> for LmdbStoreError {
    fn from(e: heed::Error) -> Self {
        match e {
            heed::Error::Decoding(inner) => LmdbStoreError::Corrupt(inner.to_string()),
            other => LmdbStoreError::Transaction(other.to_string()),
        }
    }
}

impl LmdbStoreError {
    fn into_persistence(self, operation: &'static str) -> PersistenceError {
        match self {
            LmdbStoreError::Corrupt(reason) => PersistenceError::Corrupted {
                layer: Layer::Persistent,
                reason,
            },
            other => PersistenceError::failed(Layer::Persistent, operation, other.to_string()),
        }
    }
}

/// Convert LmdbStoreError to PersistenceError.
impl From<LmdbStoreError> for PersistenceError {
    fn from(e: LmdbStoreError) -> Self {
        e.into_persistence("open")
    }
}

#[derive(Clone, Copy)]
struct Databases {
    snapshots: Database<Str, SerdeJson<SnapshotBatch>>,
    statistics: Database<SequenceKey, SerdeJson<StoredStatistics>>,
    history: Database<SequenceKey, SerdeJson<HistoryEntry>>,
    meta: Database<Str, Str>,
}

impl Databases {
    fn latest_sequence(&self, rtxn: &RoTxn) -> Result<Option<u64>, LmdbStoreError> {
        match self.meta.get(rtxn, LATEST_STATISTICS_KEY)? {
            Some(raw) => raw
                .parse::<u64>()
                .map(Some)
                .map_err(|e| LmdbStoreError::Corrupt(format!("statistics pointer {raw:?}: {e}"))),
            None => Ok(None),
        }
    }
}

/// [`PersistentStore`] on a local LMDB environment.
///
/// Cloning is cheap and shares the environment.
#[derive(Clone)]
pub struct LmdbPersistentStore {
    env: Env,
    dbs: Databases,
}

impl std::fmt::Debug for LmdbPersistentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbPersistentStore")
            .field("path", &self.env.path())
            .finish()
    }
}

impl LmdbPersistentStore {
    /// Open or create a store at `path` with a map of `max_size_mb` megabytes.
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(4)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        let open_err = |e: heed::Error| LmdbStoreError::DbOpen(e.to_string());
        let dbs = Databases {
            snapshots: env
                .create_database(&mut wtxn, Some("snapshots"))
                .map_err(open_err)?,
            statistics: env
                .create_database(&mut wtxn, Some("statistics"))
                .map_err(open_err)?,
            history: env
                .create_database(&mut wtxn, Some("history"))
                .map_err(open_err)?,
            meta: env.create_database(&mut wtxn, Some("meta")).map_err(open_err)?,
        };
        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        tracing::debug!(path = %path.as_ref().display(), max_size_mb, "opened LMDB store");
        Ok(Self { env, dbs })
    }

    /// Open the store at the configured location.
    pub fn from_config(config: &StorageConfig) -> Result<Self, LmdbStoreError> {
        Self::open(config.store_path(), config.lmdb_map_mb)
    }

    async fn run<T, F>(&self, operation: &'static str, f: F) -> Result<T, PersistenceError>
    where
        T: Send + 'static,
        F: FnOnce(&Env, Databases) -> Result<T, LmdbStoreError> + Send + 'static,
    {
        let env = self.env.clone();
        let dbs = self.dbs;
        tokio::task::spawn_blocking(move || f(&env, dbs))
            .await
            .map_err(|e| LmdbStoreError::Task(e.to_string()).into_persistence(operation))?
            .map_err(|e| e.into_persistence(operation))
    }
}

#[async_trait]
impl PersistentStore for LmdbPersistentStore {
    async fn save_snapshot_batch(&self, batch: &SnapshotBatch) -> Result<(), PersistenceError> {
        let batch = batch.clone();
        self.run("save_snapshot_batch", move |env, dbs| {
            let key = batch.batch_id.to_string();
            let mut wtxn = env.write_txn()?;
            dbs.snapshots.put(&mut wtxn, &key, &batch)?;
            dbs.meta.put(&mut wtxn, LATEST_BATCH_KEY, &key)?;
            wtxn.commit()?;
            Ok(())
        })
        .await
    }

    async fn save_sector_statistics(
        &self,
        table: &StatisticsTable,
        computed_at: Timestamp,
    ) -> Result<(), PersistenceError> {
        let stored = StoredStatistics::new(table.clone(), computed_at);
        self.run("save_sector_statistics", move |env, dbs| {
            let mut wtxn = env.write_txn()?;
            let sequence = match dbs.statistics.last(&wtxn)? {
                Some((last, _)) => last + 1,
                None => 0,
            };
            let entry = HistoryEntry {
                sequence,
                batch_id: stored.table.batch_id,
                computed_at,
                sector_count: stored.table.sector_count(),
                total_samples: stored.table.total_samples(),
            };
            dbs.statistics.put(&mut wtxn, &sequence, &stored)?;
            dbs.history.put(&mut wtxn, &sequence, &entry)?;
            dbs.meta
                .put(&mut wtxn, LATEST_STATISTICS_KEY, &sequence.to_string())?;
            wtxn.commit()?;
            Ok(())
        })
        .await
    }

    async fn load_sector_statistics(&self) -> Result<Option<StoredStatistics>, PersistenceError> {
        self.run("load_sector_statistics", |env, dbs| {
            let rtxn = env.read_txn()?;
            match dbs.latest_sequence(&rtxn)? {
                Some(sequence) => Ok(dbs.statistics.get(&rtxn, &sequence)?),
                None => Ok(None),
            }
        })
        .await
    }

    async fn load_latest_snapshot_batch(&self) -> Result<Option<SnapshotBatch>, PersistenceError> {
        self.run("load_latest_snapshot_batch", |env, dbs| {
            let rtxn = env.read_txn()?;
            match dbs.meta.get(&rtxn, LATEST_BATCH_KEY)? {
                Some(key) => Ok(dbs.snapshots.get(&rtxn, key)?),
                None => Ok(None),
            }
        })
        .await
    }

    async fn statistics_history(&self, limit: usize) -> Result<Vec<HistoryEntry>, PersistenceError> {
        self.run("statistics_history", move |env, dbs| {
            let rtxn = env.read_txn()?;
            let mut entries = Vec::new();
            for item in dbs.history.rev_iter(&rtxn)?.take(limit) {
                let (_, entry) = item?;
                entries.push(entry);
            }
            Ok(entries)
        })
        .await
    }

    async fn prune_history(&self, keep: usize) -> Result<usize, PersistenceError> {
        self.run("prune_history", move |env, dbs| {
            let mut wtxn = env.write_txn()?;

            let mut retained = BTreeSet::new();
            let mut doomed = Vec::new();
            for (position, item) in dbs.history.rev_iter(&wtxn)?.enumerate() {
                let (sequence, entry) = item?;
                if position < keep {
                    retained.insert(entry.batch_id.to_string());
                } else {
                    doomed.push(sequence);
                }
            }
            if let Some(latest) = dbs.meta.get(&wtxn, LATEST_BATCH_KEY)? {
                retained.insert(latest.to_string());
            }

            let mut orphaned = Vec::new();
            for item in dbs.snapshots.iter(&wtxn)? {
                let (key, _) = item?;
                if !retained.contains(key) {
                    orphaned.push(key.to_string());
                }
            }

            for sequence in &doomed {
                dbs.statistics.delete(&mut wtxn, sequence)?;
                dbs.history.delete(&mut wtxn, sequence)?;
            }
            for key in &orphaned {
                dbs.snapshots.delete(&mut wtxn, key)?;
            }
            wtxn.commit()?;

            if !doomed.is_empty() {
                tracing::debug!(
                    tables = doomed.len(),
                    batches = orphaned.len(),
                    "pruned statistics history"
                );
            }
            Ok(doomed.len())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use sectorscope_core::{new_batch_id, SectorStatistics, SnapshotRecord, ValuationField};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn create_test_store() -> (LmdbPersistentStore, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store =
            LmdbPersistentStore::open(temp_dir.path(), 10).expect("store creation should succeed");
        (store, temp_dir)
    }

    fn at(hour: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2026, 10, 17, hour, 0, 0).unwrap()
    }

    fn make_table(computed_at: Timestamp) -> StatisticsTable {
        let sector = sectorscope_core::SectorNormalizer::new()
            .normalize("전기전자")
            .unwrap();
        let mut sectors = BTreeMap::new();
        sectors.insert(
            sector.clone(),
            SectorStatistics {
                sector,
                sample_size: 3,
                percentiles: BTreeMap::new(),
                computed_at,
            },
        );
        StatisticsTable {
            batch_id: new_batch_id(),
            computed_at,
            sectors,
        }
    }

    fn make_batch() -> SnapshotBatch {
        let records = vec![
            SnapshotRecord::new("005930", "전기전자", at(1))
                .with_field(ValuationField::PER, Some(12.5)),
            SnapshotRecord::new("000660", "전기·전자", at(1))
                .with_field(ValuationField::PER, None),
        ];
        SnapshotBatch::new(at(1), records).expect("valid batch")
    }

    #[tokio::test]
    async fn test_empty_store_loads_none() {
        let (store, _temp_dir) = create_test_store();
        assert!(store.load_sector_statistics().await.unwrap().is_none());
        assert!(store.load_latest_snapshot_batch().await.unwrap().is_none());
        assert!(store.statistics_history(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_and_load_statistics() {
        let (store, _temp_dir) = create_test_store();
        let table = make_table(at(2));
        store
            .save_sector_statistics(&table, at(2))
            .await
            .expect("save should succeed");

        let loaded = store
            .load_sector_statistics()
            .await
            .expect("load should succeed")
            .expect("table should be present");
        assert_eq!(loaded.table, table);
        assert_eq!(loaded.computed_at, at(2));
    }

    #[tokio::test]
    async fn test_latest_table_replaces_previous() {
        let (store, _temp_dir) = create_test_store();
        let old = make_table(at(2));
        let new = make_table(at(3));
        store.save_sector_statistics(&old, at(2)).await.unwrap();
        store.save_sector_statistics(&new, at(3)).await.unwrap();

        let loaded = store.load_sector_statistics().await.unwrap().unwrap();
        assert_eq!(loaded.table.batch_id, new.batch_id);

        let history = store.statistics_history(10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].batch_id, new.batch_id);
        assert_eq!(history[1].batch_id, old.batch_id);
        assert_eq!(history[0].total_samples, 3);
    }

    #[tokio::test]
    async fn test_snapshot_batch_roundtrip_keeps_missing_values() {
        let (store, _temp_dir) = create_test_store();
        let batch = make_batch();
        store.save_snapshot_batch(&batch).await.unwrap();

        let loaded = store.load_latest_snapshot_batch().await.unwrap().unwrap();
        assert_eq!(loaded, batch);
        assert_eq!(
            loaded.records[1].valuation_fields.get(&ValuationField::new(ValuationField::PER)),
            Some(&None)
        );
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let table = make_table(at(4));
        {
            let store = LmdbPersistentStore::open(temp_dir.path(), 10).unwrap();
            store.save_sector_statistics(&table, at(4)).await.unwrap();
        }
        let store = LmdbPersistentStore::open(temp_dir.path(), 10).unwrap();
        let loaded = store.load_sector_statistics().await.unwrap().unwrap();
        assert_eq!(loaded.table.batch_id, table.batch_id);
    }

    #[tokio::test]
    async fn test_prune_keeps_newest() {
        let (store, _temp_dir) = create_test_store();
        let mut last = None;
        for hour in 0..5 {
            let batch = make_batch();
            store.save_snapshot_batch(&batch).await.unwrap();
            let mut table = make_table(at(hour));
            table.batch_id = batch.batch_id;
            store.save_sector_statistics(&table, at(hour)).await.unwrap();
            last = Some(table);
        }

        assert_eq!(store.prune_history(2).await.unwrap(), 3);
        let history = store.statistics_history(10).await.unwrap();
        assert_eq!(history.len(), 2);

        let latest = store.load_sector_statistics().await.unwrap().unwrap();
        assert_eq!(Some(latest.table.batch_id), last.map(|t| t.batch_id));
        assert!(store.load_latest_snapshot_batch().await.unwrap().is_some());
    }
}
