//! SECTORSCOPE Storage - Durable Layers and Cache
//!
//! Defines the two durable layers the cache resolves against, their
//! implementations, the snapshot collector seam, and the [`cache`] module
//! holding the coordinator.
//!
//! - [`PersistentStore`]: source of truth for snapshot batches and
//!   statistics tables ([`LmdbPersistentStore`], [`MockPersistentStore`]).
//! - [`FallbackArchive`]: single-slot copy of the last table, consulted only
//!   when the store has nothing ([`FileArchive`], [`MockArchive`]).
//! - [`SnapshotCollector`]: the external collection pipeline
//!   ([`JsonFileCollector`]).

pub mod cache;
pub mod collector;
pub mod file_archive;
pub mod lmdb_store;
pub mod mock;

use async_trait::async_trait;
use sectorscope_core::{
    BatchId, PersistenceError, SnapshotBatch, StatisticsTable, Timestamp,
};
use serde::{Deserialize, Serialize};

pub use cache::{
    spawn_scheduled_refresh, CacheCoordinator, CacheEntry, CacheHealth, EntryPayload,
    LayerKind, LayerLookup, RefreshMode, RefreshProgress, RefreshReport, RefreshRequest,
    ScheduledRefreshConfig, ScheduledRefreshMetrics, SectorLookup, SectorRead, StageOutcome,
    StageStatus, StatisticsRead,
};
pub use collector::{JsonFileCollector, SnapshotCollector};
pub use file_archive::{ArchiveFileError, FileArchive};
pub use lmdb_store::{LmdbPersistentStore, LmdbStoreError};
pub use mock::{MockArchive, MockPersistentStore};

// ============================================================================
// STORED PAYLOADS
// ============================================================================

/// A statistics table as held by a durable layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredStatistics {
    pub table: StatisticsTable,
    pub computed_at: Timestamp,
}

impl StoredStatistics {
    pub fn new(table: StatisticsTable, computed_at: Timestamp) -> Self {
        Self { table, computed_at }
    }
}

/// One row of the persistent store's statistics history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub sequence: u64,
    pub batch_id: BatchId,
    pub computed_at: Timestamp,
    pub sector_count: usize,
    pub total_samples: usize,
}

// ============================================================================
// LAYER TRAITS
// ============================================================================

/// Durable source of truth for snapshot batches and statistics tables.
///
/// Saving a table replaces the latest one: loads return the most recently
/// saved table. Implementations must survive process restarts.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Store a full snapshot batch and mark it as the latest.
    async fn save_snapshot_batch(&self, batch: &SnapshotBatch) -> Result<(), PersistenceError>;

    /// Store a statistics table and mark it as the latest.
    async fn save_sector_statistics(
        &self,
        table: &StatisticsTable,
        computed_at: Timestamp,
    ) -> Result<(), PersistenceError>;

    /// Latest statistics table, or `None` if none was ever saved.
    async fn load_sector_statistics(&self) -> Result<Option<StoredStatistics>, PersistenceError>;

    /// Latest snapshot batch, or `None` if none was ever saved.
    async fn load_latest_snapshot_batch(&self) -> Result<Option<SnapshotBatch>, PersistenceError>;

    /// Saved tables, newest first, at most `limit` entries.
    async fn statistics_history(&self, limit: usize) -> Result<Vec<HistoryEntry>, PersistenceError>;

    /// Drop all but the `keep` newest tables. Returns how many were removed.
    async fn prune_history(&self, keep: usize) -> Result<usize, PersistenceError>;
}

/// Single-slot durable copy of the last computed statistics table.
///
/// Never more authoritative than the [`PersistentStore`].
#[async_trait]
pub trait FallbackArchive: Send + Sync {
    /// Replace the archived table wholesale.
    async fn save(
        &self,
        table: &StatisticsTable,
        computed_at: Timestamp,
    ) -> Result<(), PersistenceError>;

    /// The archived table, or `None` if the archive is empty.
    async fn load(&self) -> Result<Option<StoredStatistics>, PersistenceError>;
}
