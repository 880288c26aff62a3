//! In-memory layers for testing.
//!
//! Both mocks share state across clones and can be told to fail reads or
//! writes, which is how the fall-through and partial-success paths are
//! exercised without a real disk.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use sectorscope_core::{
    BatchId, Layer, PersistenceError, SnapshotBatch, StatisticsTable, Timestamp,
};

use crate::{FallbackArchive, HistoryEntry, PersistentStore, StoredStatistics};

#[derive(Debug, Default)]
struct Faults {
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    loads: AtomicUsize,
    writes: AtomicUsize,
    read_delay_ms: AtomicU64,
    write_delay_ms: AtomicU64,
}

impl Faults {
    async fn pause(delay_ms: &AtomicU64) {
        let ms = delay_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    async fn check_read(&self, layer: Layer, operation: &'static str) -> Result<(), PersistenceError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Self::pause(&self.read_delay_ms).await;
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(PersistenceError::failed(layer, operation, "injected read failure"));
        }
        Ok(())
    }

    async fn check_write(&self, layer: Layer, operation: &'static str) -> Result<(), PersistenceError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Self::pause(&self.write_delay_ms).await;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PersistenceError::failed(layer, operation, "injected write failure"));
        }
        Ok(())
    }
}

fn delay_ms(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// MOCK PERSISTENT STORE
// ============================================================================

#[derive(Debug, Default)]
struct StoreState {
    batches: BTreeMap<BatchId, SnapshotBatch>,
    latest_batch: Option<BatchId>,
    tables: BTreeMap<u64, StoredStatistics>,
    next_sequence: u64,
}

/// In-memory [`PersistentStore`].
#[derive(Debug, Default, Clone)]
pub struct MockPersistentStore {
    state: Arc<RwLock<StoreState>>,
    faults: Arc<Faults>,
}

impl MockPersistentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.faults.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.faults.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Sleep before answering every later read.
    pub fn set_read_delay(&self, delay: Duration) {
        self.faults.read_delay_ms.store(delay_ms(delay), Ordering::SeqCst);
    }

    /// Sleep before applying every later write.
    pub fn set_write_delay(&self, delay: Duration) {
        self.faults.write_delay_ms.store(delay_ms(delay), Ordering::SeqCst);
    }

    /// Number of read calls served (including injected failures).
    pub fn load_count(&self) -> usize {
        self.faults.loads.load(Ordering::SeqCst)
    }

    /// Number of write calls attempted (including injected failures).
    pub fn write_count(&self) -> usize {
        self.faults.writes.load(Ordering::SeqCst)
    }

    pub fn table_count(&self) -> usize {
        self.read().map(|s| s.tables.len()).unwrap_or(0)
    }

    pub fn batch_count(&self) -> usize {
        self.read().map(|s| s.batches.len()).unwrap_or(0)
    }

    /// Drop everything, as if the store were freshly created.
    pub fn clear(&self) {
        if let Ok(mut state) = self.write() {
            *state = StoreState::default();
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>, PersistenceError> {
        self.state.read().map_err(|_| PersistenceError::LockPoisoned {
            layer: Layer::Persistent,
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>, PersistenceError> {
        self.state.write().map_err(|_| PersistenceError::LockPoisoned {
            layer: Layer::Persistent,
        })
    }
}

#[async_trait]
impl PersistentStore for MockPersistentStore {
    async fn save_snapshot_batch(&self, batch: &SnapshotBatch) -> Result<(), PersistenceError> {
        self.faults.check_write(Layer::Persistent, "save_snapshot_batch").await?;
        let mut state = self.write()?;
        state.batches.insert(batch.batch_id, batch.clone());
        state.latest_batch = Some(batch.batch_id);
        Ok(())
    }

    async fn save_sector_statistics(
        &self,
        table: &StatisticsTable,
        computed_at: Timestamp,
    ) -> Result<(), PersistenceError> {
        self.faults.check_write(Layer::Persistent, "save_sector_statistics").await?;
        let mut state = self.write()?;
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state
            .tables
            .insert(sequence, StoredStatistics::new(table.clone(), computed_at));
        Ok(())
    }

    async fn load_sector_statistics(&self) -> Result<Option<StoredStatistics>, PersistenceError> {
        self.faults.check_read(Layer::Persistent, "load_sector_statistics").await?;
        let state = self.read()?;
        Ok(state.tables.values().next_back().cloned())
    }

    async fn load_latest_snapshot_batch(&self) -> Result<Option<SnapshotBatch>, PersistenceError> {
        self.faults.check_read(Layer::Persistent, "load_latest_snapshot_batch").await?;
        let state = self.read()?;
        Ok(state
            .latest_batch
            .and_then(|id| state.batches.get(&id))
            .cloned())
    }

    async fn statistics_history(&self, limit: usize) -> Result<Vec<HistoryEntry>, PersistenceError> {
        self.faults.check_read(Layer::Persistent, "statistics_history").await?;
        let state = self.read()?;
        Ok(state
            .tables
            .iter()
            .rev()
            .take(limit)
            .map(|(sequence, stored)| HistoryEntry {
                sequence: *sequence,
                batch_id: stored.table.batch_id,
                computed_at: stored.computed_at,
                sector_count: stored.table.sector_count(),
                total_samples: stored.table.total_samples(),
            })
            .collect())
    }

    async fn prune_history(&self, keep: usize) -> Result<usize, PersistenceError> {
        self.faults.check_write(Layer::Persistent, "prune_history").await?;
        let mut state = self.write()?;
        let excess = state.tables.len().saturating_sub(keep);
        let doomed: Vec<u64> = state.tables.keys().take(excess).copied().collect();
        for sequence in &doomed {
            state.tables.remove(sequence);
        }
        Ok(doomed.len())
    }
}

// ============================================================================
// MOCK ARCHIVE
// ============================================================================

/// In-memory [`FallbackArchive`].
#[derive(Debug, Default, Clone)]
pub struct MockArchive {
    slot: Arc<RwLock<Option<StoredStatistics>>>,
    faults: Arc<Faults>,
}

impl MockArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Archive preloaded with a table, e.g. one left over from an older run.
    pub fn with_contents(stored: StoredStatistics) -> Self {
        let archive = Self::default();
        if let Ok(mut slot) = archive.slot.write() {
            *slot = Some(stored);
        }
        archive
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.faults.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.faults.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn load_count(&self) -> usize {
        self.faults.loads.load(Ordering::SeqCst)
    }

    /// Current contents without counting as a load.
    pub fn contents(&self) -> Option<StoredStatistics> {
        self.slot.read().ok().and_then(|s| s.clone())
    }
}

#[async_trait]
impl FallbackArchive for MockArchive {
    async fn save(
        &self,
        table: &StatisticsTable,
        computed_at: Timestamp,
    ) -> Result<(), PersistenceError> {
        self.faults.check_write(Layer::Archive, "save").await?;
        let mut slot = self
            .slot
            .write()
            .map_err(|_| PersistenceError::LockPoisoned { layer: Layer::Archive })?;
        *slot = Some(StoredStatistics::new(table.clone(), computed_at));
        Ok(())
    }

    async fn load(&self) -> Result<Option<StoredStatistics>, PersistenceError> {
        self.faults.check_read(Layer::Archive, "load").await?;
        let slot = self
            .slot
            .read()
            .map_err(|_| PersistenceError::LockPoisoned { layer: Layer::Archive })?;
        Ok(slot.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn table() -> StatisticsTable {
        StatisticsTable {
            batch_id: sectorscope_core::new_batch_id(),
            computed_at: Utc::now(),
            sectors: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_store_latest_wins() {
        let store = MockPersistentStore::new();
        assert!(store.load_sector_statistics().await.unwrap().is_none());

        let first = table();
        let second = table();
        store.save_sector_statistics(&first, first.computed_at).await.unwrap();
        store.save_sector_statistics(&second, second.computed_at).await.unwrap();

        let loaded = store.load_sector_statistics().await.unwrap().unwrap();
        assert_eq!(loaded.table.batch_id, second.batch_id);
        assert_eq!(store.table_count(), 2);
    }

    #[tokio::test]
    async fn test_store_history_and_prune() {
        let store = MockPersistentStore::new();
        for _ in 0..5 {
            let t = table();
            store.save_sector_statistics(&t, t.computed_at).await.unwrap();
        }
        let history = store.statistics_history(3).await.unwrap();
        assert_eq!(history.len(), 3);
        assert!(history[0].sequence > history[1].sequence);

        assert_eq!(store.prune_history(2).await.unwrap(), 3);
        assert_eq!(store.table_count(), 2);
        assert_eq!(store.prune_history(2).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MockPersistentStore::new();
        store.set_fail_reads(true);
        let err = store.load_sector_statistics().await.unwrap_err();
        assert_eq!(err.layer(), Layer::Persistent);
        assert_eq!(store.load_count(), 1);

        let archive = MockArchive::new();
        archive.set_fail_writes(true);
        let t = table();
        assert!(archive.save(&t, t.computed_at).await.is_err());
        assert!(archive.contents().is_none());
    }

    #[tokio::test]
    async fn test_archive_single_slot() {
        let archive = MockArchive::new();
        let a = table();
        let b = table();
        archive.save(&a, a.computed_at).await.unwrap();
        archive.save(&b, b.computed_at).await.unwrap();
        assert_eq!(archive.load().await.unwrap().unwrap().table.batch_id, b.batch_id);
    }
}
