//! Enum types shared by the cache layers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// LAYERS
// ============================================================================

/// Which layer a statistics table was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Layer {
    /// The durable store (source of truth)
    Persistent,
    /// The single-slot fallback archive
    Archive,
    /// Freshly computed by an aggregation run
    Computed,
}

impl Layer {
    /// Convert to the string used in logs and persisted metadata.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Layer::Persistent => "persistent",
            Layer::Archive => "archive",
            Layer::Computed => "computed",
        }
    }

    /// Parse from string representation.
    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match s.trim().to_lowercase().as_str() {
            "persistent" => Ok(Layer::Persistent),
            "archive" => Ok(Layer::Archive),
            "computed" => Ok(Layer::Computed),
            _ => Err(EnumParseError::new("Layer", s)),
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for Layer {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

// ============================================================================
// FRESHNESS STATE
// ============================================================================

/// Tri-state answer to "do we have usable sector statistics right now".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FreshnessState {
    /// Data exists and is within the freshness horizon
    Fresh,
    /// Data exists but is older than the freshness horizon
    Stale,
    /// No layer has data
    Absent,
}

impl FreshnessState {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            FreshnessState::Fresh => "FRESH",
            FreshnessState::Stale => "STALE",
            FreshnessState::Absent => "ABSENT",
        }
    }

    pub fn has_data(&self) -> bool {
        !matches!(self, FreshnessState::Absent)
    }
}

impl fmt::Display for FreshnessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

// ============================================================================
// REFRESH PIPELINE
// ============================================================================

/// Discrete stages of a refresh run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RefreshStage {
    Collect,
    PersistSnapshot,
    Aggregate,
    PersistStatistics,
    PersistArchive,
}

impl RefreshStage {
    /// All stages in execution order.
    pub const ALL: [RefreshStage; 5] = [
        RefreshStage::Collect,
        RefreshStage::PersistSnapshot,
        RefreshStage::Aggregate,
        RefreshStage::PersistStatistics,
        RefreshStage::PersistArchive,
    ];

    pub fn as_db_str(&self) -> &'static str {
        match self {
            RefreshStage::Collect => "collect",
            RefreshStage::PersistSnapshot => "persist_snapshot",
            RefreshStage::Aggregate => "aggregate",
            RefreshStage::PersistStatistics => "persist_statistics",
            RefreshStage::PersistArchive => "persist_archive",
        }
    }
}

impl fmt::Display for RefreshStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

/// Terminal status of a refresh run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefreshStatus {
    /// Every stage completed and both layers hold the new table
    Success,
    /// The new table was computed and stored in at least one layer,
    /// but some write failed
    PartialSuccess,
    /// No new table was stored; prior data is untouched
    Failed,
    /// Nothing ran because the current data was already fresh
    Skipped,
}

impl RefreshStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            RefreshStatus::Success => "success",
            RefreshStatus::PartialSuccess => "partial_success",
            RefreshStatus::Failed => "failed",
            RefreshStatus::Skipped => "skipped",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, RefreshStatus::Failed)
    }
}

impl fmt::Display for RefreshStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

/// Whether a sector's statistics may be handed to a caller expecting data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Availability {
    Available,
    /// Recorded with `sample_size == 0`
    Unavailable,
}

// ============================================================================
// PARSE ERROR
// ============================================================================

/// Error when parsing an invalid enum string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid {kind}: {value}")]
pub struct EnumParseError {
    pub kind: &'static str,
    pub value: String,
}

impl EnumParseError {
    pub fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}
