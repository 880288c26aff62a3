//! Freshness labels and read results.
//!
//! Every read carries where its data came from, when it was computed, and
//! whether it is past the freshness horizon. Stale data is still returned;
//! the label is how callers learn to trust it less.

use std::sync::Arc;
use std::time::Duration;

use sectorscope_core::{
    FreshnessState, Layer, NormalizedSector, PersistenceError, SectorStatistics,
    StaleDataWarning, StatisticsTable, Timestamp,
};

use crate::StoredStatistics;

/// Label data of a given age against a horizon.
///
/// Age exactly at the horizon is still FRESH.
pub fn classify(age: Duration, horizon: Duration) -> FreshnessState {
    if age > horizon {
        FreshnessState::Stale
    } else {
        FreshnessState::Fresh
    }
}

// ============================================================================
// CACHE ENTRY
// ============================================================================

/// What a [`CacheEntry`] holds.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryPayload {
    Table(Arc<StoredStatistics>),
    /// Every layer was empty or failing when the entry was made.
    Absent,
}

/// Immutable, timestamped record of one resolution or refresh.
///
/// A newer entry supersedes an older one; entries are never edited.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub name: &'static str,
    pub payload: EntryPayload,
    /// Layer the table came from; `None` for the absent marker.
    pub source: Option<Layer>,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

impl CacheEntry {
    pub const NAME: &'static str = "sector_statistics";

    pub fn table(stored: Arc<StoredStatistics>, source: Layer, now: Timestamp, ttl: Duration) -> Self {
        Self {
            name: Self::NAME,
            payload: EntryPayload::Table(stored),
            source: Some(source),
            created_at: now,
            expires_at: now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero()),
        }
    }

    pub fn absent(now: Timestamp, ttl: Duration) -> Self {
        Self {
            name: Self::NAME,
            payload: EntryPayload::Absent,
            source: None,
            created_at: now,
            expires_at: now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero()),
        }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    pub fn is_absent(&self) -> bool {
        matches!(self.payload, EntryPayload::Absent)
    }

    pub fn stored(&self) -> Option<&StoredStatistics> {
        match &self.payload {
            EntryPayload::Table(stored) => Some(stored),
            EntryPayload::Absent => None,
        }
    }
}

// ============================================================================
// READ RESULTS
// ============================================================================

/// Result of resolving the statistics table through the layer chain.
#[derive(Debug, Clone)]
pub struct StatisticsRead {
    state: FreshnessState,
    layer: Option<Layer>,
    stored: Option<Arc<StoredStatistics>>,
    age: Option<Duration>,
    warning: Option<StaleDataWarning>,
    layer_failures: Vec<PersistenceError>,
}

impl StatisticsRead {
    pub(crate) fn hit(
        stored: Arc<StoredStatistics>,
        layer: Layer,
        now: Timestamp,
        horizon: Duration,
        layer_failures: Vec<PersistenceError>,
    ) -> Self {
        let age = (now - stored.computed_at).to_std().unwrap_or(Duration::ZERO);
        let state = classify(age, horizon);
        let warning = (state == FreshnessState::Stale).then_some(StaleDataWarning {
            layer,
            age,
            horizon,
        });
        Self {
            state,
            layer: Some(layer),
            stored: Some(stored),
            age: Some(age),
            warning,
            layer_failures,
        }
    }

    pub(crate) fn absent(layer_failures: Vec<PersistenceError>) -> Self {
        Self {
            state: FreshnessState::Absent,
            layer: None,
            stored: None,
            age: None,
            warning: None,
            layer_failures,
        }
    }

    pub fn state(&self) -> FreshnessState {
        self.state
    }

    pub fn is_fresh(&self) -> bool {
        self.state == FreshnessState::Fresh
    }

    pub fn is_stale(&self) -> bool {
        self.state == FreshnessState::Stale
    }

    pub fn is_absent(&self) -> bool {
        self.state == FreshnessState::Absent
    }

    /// Layer that served the data.
    pub fn layer(&self) -> Option<Layer> {
        self.layer
    }

    pub fn table(&self) -> Option<&StatisticsTable> {
        self.stored.as_deref().map(|s| &s.table)
    }

    pub fn stored(&self) -> Option<&Arc<StoredStatistics>> {
        self.stored.as_ref()
    }

    pub fn computed_at(&self) -> Option<Timestamp> {
        self.stored.as_deref().map(|s| s.computed_at)
    }

    pub fn age(&self) -> Option<Duration> {
        self.age
    }

    pub fn warning(&self) -> Option<&StaleDataWarning> {
        self.warning.as_ref()
    }

    /// Errors from layers that were skipped on the way to this result.
    pub fn layer_failures(&self) -> &[PersistenceError] {
        &self.layer_failures
    }

    /// Narrow the read to one sector.
    pub fn sector(&self, sector: NormalizedSector) -> SectorRead {
        let lookup = match self.table() {
            None => SectorLookup::NoData,
            Some(table) => match table.get(&sector) {
                None => SectorLookup::UnknownSector,
                Some(stats) if !stats.is_available() => SectorLookup::Unavailable,
                Some(stats) => SectorLookup::Available(stats.clone()),
            },
        };
        SectorRead {
            sector,
            state: self.state,
            layer: self.layer,
            computed_at: self.computed_at(),
            warning: self.warning,
            lookup,
        }
    }
}

/// Outcome of looking one sector up in a resolved table.
#[derive(Debug, Clone, PartialEq)]
pub enum SectorLookup {
    /// Statistics with at least one contributing record.
    Available(SectorStatistics),
    /// The sector was recorded with no contributing records.
    Unavailable,
    /// A table exists but the sector is not in it.
    UnknownSector,
    /// No layer had a table.
    NoData,
}

/// Per-sector read: the lookup plus the metadata of the table it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct SectorRead {
    pub sector: NormalizedSector,
    pub state: FreshnessState,
    pub layer: Option<Layer>,
    pub computed_at: Option<Timestamp>,
    pub warning: Option<StaleDataWarning>,
    pub lookup: SectorLookup,
}

impl SectorRead {
    pub fn statistics(&self) -> Option<&SectorStatistics> {
        match &self.lookup {
            SectorLookup::Available(stats) => Some(stats),
            _ => None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.statistics().is_some()
    }
}
