//! Multi-tier cache over the durable layers.
//!
//! Reads go through [`CacheCoordinator`], which walks the layer chain on
//! every call and labels the answer FRESH, STALE or ABSENT. Refreshes are
//! single-flight and report progress per stage.
//!
//! # Example
//!
//! ```ignore
//! let read = coordinator.get_sector_statistics("전기전자").await?;
//! if let Some(warning) = &read.warning {
//!     tracing::warn!("{}", warning);
//! }
//! match read.lookup {
//!     SectorLookup::Available(stats) => render(&stats),
//!     SectorLookup::Unavailable => println!("unavailable for this sector"),
//!     _ => println!("no statistics"),
//! }
//! ```

mod coordinator;
mod freshness;
mod report;
mod scheduler;

pub use coordinator::{CacheCoordinator, CacheHealth, LayerKind, LayerLookup};
pub use freshness::{
    classify, CacheEntry, EntryPayload, SectorLookup, SectorRead, StatisticsRead,
};
pub use report::{
    RefreshMode, RefreshProgress, RefreshReport, RefreshRequest, StageOutcome, StageStatus,
};
pub use scheduler::{
    spawn_scheduled_refresh, ScheduledRefreshConfig, ScheduledRefreshMetrics, SCHEDULER_TRIGGER,
};
