//! Sector statistics and the persisted statistics table

use crate::{Availability, BatchId, NormalizedSector, Timestamp, ValuationField};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// A single percentile breakpoint (`p` in `[0, 1]`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub p: f64,
    pub value: f64,
}

/// Percentile breakpoints of one valuation field within one sector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldPercentiles {
    /// Records in the sector with a present value for this field.
    pub present_count: usize,
    /// Ordered by `p`; values are non-decreasing.
    pub breakpoints: Vec<Breakpoint>,
}

impl FieldPercentiles {
    /// Value at exactly probability `p`, if it is one of the breakpoints.
    pub fn at(&self, p: f64) -> Option<f64> {
        self.breakpoints
            .iter()
            .find(|b| (b.p - p).abs() < 1e-9)
            .map(|b| b.value)
    }

    pub fn median(&self) -> Option<f64> {
        self.at(0.5)
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.breakpoints.iter().map(|b| b.value)
    }
}

/// Statistics for one normalized sector in one collection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorStatistics {
    pub sector: NormalizedSector,
    /// Records mapped to this sector, independent of per-field missingness.
    pub sample_size: usize,
    /// Fields with no present values are omitted, never zero-filled.
    pub percentiles: BTreeMap<ValuationField, FieldPercentiles>,
    pub computed_at: Timestamp,
}

impl SectorStatistics {
    /// Explicit "no data" marker for a sector.
    pub fn unavailable(sector: NormalizedSector, computed_at: Timestamp) -> Self {
        Self {
            sector,
            sample_size: 0,
            percentiles: BTreeMap::new(),
            computed_at,
        }
    }

    pub fn availability(&self) -> Availability {
        if self.sample_size == 0 {
            Availability::Unavailable
        } else {
            Availability::Available
        }
    }

    pub fn is_available(&self) -> bool {
        self.availability() == Availability::Available
    }

    pub fn field(&self, field: &str) -> Option<&FieldPercentiles> {
        self.percentiles.get(&ValuationField::new(field))
    }
}

/// The unit both durable layers persist: every sector from one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsTable {
    pub batch_id: BatchId,
    pub computed_at: Timestamp,
    pub sectors: BTreeMap<NormalizedSector, SectorStatistics>,
}

impl StatisticsTable {
    pub fn get(&self, sector: &NormalizedSector) -> Option<&SectorStatistics> {
        self.sectors.get(sector)
    }

    pub fn sector_count(&self) -> usize {
        self.sectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }

    /// Total records across all sectors.
    pub fn total_samples(&self) -> usize {
        self.sectors.values().map(|s| s.sample_size).sum()
    }

    /// Age of the table relative to `now`; zero if computed in the future.
    pub fn age(&self, now: Timestamp) -> Duration {
        (now - self.computed_at).to_std().unwrap_or(Duration::ZERO)
    }
}
