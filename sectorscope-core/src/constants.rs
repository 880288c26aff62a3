//! Constants for SECTORSCOPE
//!
//! Defaults for every configurable knob live here so the env loaders,
//! the builders and the tests agree on one value.

// ============================================================================
// FRESHNESS
// ============================================================================

/// Age after which stored statistics are labeled STALE (24 hours)
pub const DEFAULT_FRESHNESS_HORIZON_SECS: u64 = 86_400;

/// Lifetime of the coordinator's in-memory reference to the last entry (5 minutes)
pub const DEFAULT_ENTRY_TTL_SECS: u64 = 300;

/// Cadence of scheduled collection runs (daily)
pub const DEFAULT_COLLECTION_INTERVAL_SECS: u64 = 86_400;

// ============================================================================
// TIMEOUTS AND RETRIES
// ============================================================================

/// Bound on a single durable-layer call
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 5_000;

/// Bound on how long a caller waits for a refresh run (15 minutes)
pub const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 900;

/// Extra attempts per durable layer before degrading to the next one
pub const DEFAULT_LAYER_RETRIES: u32 = 1;

// ============================================================================
// STORAGE
// ============================================================================

/// Statistics tables kept in the persistent store's history
pub const DEFAULT_HISTORY_KEEP: usize = 30;

/// LMDB map size in megabytes
pub const DEFAULT_LMDB_MAP_MB: usize = 256;

/// Default data directory
pub const DEFAULT_DATA_DIR: &str = "./data";

/// Sub-directory of the data directory holding the LMDB environment
pub const STORE_DIR_NAME: &str = "store";

/// File name of the fallback archive inside the data directory
pub const ARCHIVE_FILE_NAME: &str = "fallback_archive.json";

// ============================================================================
// AGGREGATION
// ============================================================================

/// Default percentile breakpoints
pub const DEFAULT_PERCENTILE_POINTS: [f64; 5] = [0.10, 0.25, 0.50, 0.75, 0.90];

/// Capacity of the refresh progress broadcast channel
pub const PROGRESS_CHANNEL_CAPACITY: usize = 64;
