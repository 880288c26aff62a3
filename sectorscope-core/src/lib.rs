//! SECTORSCOPE Core - Data Model
//!
//! Snapshot records, normalized sectors, sector statistics, the error
//! taxonomy and configuration. All other crates depend on this one. No I/O
//! happens here.

pub mod clock;
pub mod config;
pub mod constants;
pub mod enums;
pub mod error;
pub mod health;
pub mod identity;
pub mod record;
pub mod sector;
pub mod statistics;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AggregationConfig, CoordinatorConfig, StorageConfig};
pub use enums::{Availability, EnumParseError, FreshnessState, Layer, RefreshStage, RefreshStatus};
pub use error::{
    CollectionError, ConfigError, InsufficientDataError, PersistenceError, ScopeError,
    ScopeResult, StaleDataWarning, ValidationError,
};
pub use health::{HealthCheck, HealthStatus};
pub use identity::{compute_content_hash, content_hash_hex, new_batch_id, BatchId, ContentHash, Timestamp};
pub use record::{SnapshotBatch, SnapshotRecord, ValuationField};
pub use sector::{canonical_form, NormalizedSector, SectorNormalizer, DEFAULT_SECTOR_SYNONYMS};
pub use statistics::{Breakpoint, FieldPercentiles, SectorStatistics, StatisticsTable};
