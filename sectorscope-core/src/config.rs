//! Configuration types
//!
//! Every config has sane defaults (see [`crate::constants`]), `with_*`
//! builders, and a `from_env()` loader. Loaders fall back to the default when
//! a variable is unset or unparsable; call `validate()` before use.

use crate::constants::*;
use crate::{ConfigError, SectorNormalizer};
use std::path::PathBuf;
use std::time::Duration;

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|s| matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn non_zero(field: &str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: format!("{:?}", value),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

// ============================================================================
// COORDINATOR
// ============================================================================

/// Configuration for the cache coordinator.
///
/// The freshness horizon (when a table is labeled STALE) and the collection
/// interval (how often the scheduler collects) are independent knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    /// Age beyond which a table is served as STALE.
    pub freshness_horizon: Duration,
    /// Lifetime of the in-memory reference returned by `peek_latest`.
    pub entry_ttl: Duration,
    /// Scheduled collection cadence.
    pub collection_interval: Duration,
    /// Bound on each durable-layer call.
    pub store_timeout: Duration,
    /// Bound on a caller's wait for a refresh run.
    pub refresh_timeout: Duration,
    /// Extra attempts per layer after the first failure.
    pub layer_retries: u32,
    /// Re-aggregate the stored snapshot batch when both layers are empty.
    pub recompute_on_absent: bool,
    /// Statistics tables kept in store history.
    pub history_keep: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            freshness_horizon: Duration::from_secs(DEFAULT_FRESHNESS_HORIZON_SECS),
            entry_ttl: Duration::from_secs(DEFAULT_ENTRY_TTL_SECS),
            collection_interval: Duration::from_secs(DEFAULT_COLLECTION_INTERVAL_SECS),
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            refresh_timeout: Duration::from_secs(DEFAULT_REFRESH_TIMEOUT_SECS),
            layer_retries: DEFAULT_LAYER_RETRIES,
            recompute_on_absent: false,
            history_keep: DEFAULT_HISTORY_KEEP,
        }
    }
}

impl CoordinatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create CoordinatorConfig from environment variables.
    ///
    /// Environment variables:
    /// - `SECTORSCOPE_FRESHNESS_HORIZON_SECS` (default: 86400)
    /// - `SECTORSCOPE_ENTRY_TTL_SECS` (default: 300)
    /// - `SECTORSCOPE_COLLECTION_INTERVAL_SECS` (default: 86400)
    /// - `SECTORSCOPE_STORE_TIMEOUT_MS` (default: 5000)
    /// - `SECTORSCOPE_REFRESH_TIMEOUT_SECS` (default: 900)
    /// - `SECTORSCOPE_LAYER_RETRIES` (default: 1)
    /// - `SECTORSCOPE_RECOMPUTE_ON_ABSENT`: "true" or "false" (default: false)
    /// - `SECTORSCOPE_HISTORY_KEEP` (default: 30)
    pub fn from_env() -> Self {
        Self {
            freshness_horizon: Duration::from_secs(
                env_parse("SECTORSCOPE_FRESHNESS_HORIZON_SECS")
                    .unwrap_or(DEFAULT_FRESHNESS_HORIZON_SECS),
            ),
            entry_ttl: Duration::from_secs(
                env_parse("SECTORSCOPE_ENTRY_TTL_SECS").unwrap_or(DEFAULT_ENTRY_TTL_SECS),
            ),
            collection_interval: Duration::from_secs(
                env_parse("SECTORSCOPE_COLLECTION_INTERVAL_SECS")
                    .unwrap_or(DEFAULT_COLLECTION_INTERVAL_SECS),
            ),
            store_timeout: Duration::from_millis(
                env_parse("SECTORSCOPE_STORE_TIMEOUT_MS").unwrap_or(DEFAULT_STORE_TIMEOUT_MS),
            ),
            refresh_timeout: Duration::from_secs(
                env_parse("SECTORSCOPE_REFRESH_TIMEOUT_SECS")
                    .unwrap_or(DEFAULT_REFRESH_TIMEOUT_SECS),
            ),
            layer_retries: env_parse("SECTORSCOPE_LAYER_RETRIES").unwrap_or(DEFAULT_LAYER_RETRIES),
            recompute_on_absent: env_bool("SECTORSCOPE_RECOMPUTE_ON_ABSENT", false),
            history_keep: env_parse("SECTORSCOPE_HISTORY_KEEP").unwrap_or(DEFAULT_HISTORY_KEEP),
        }
    }

    pub fn with_freshness_horizon(mut self, horizon: Duration) -> Self {
        self.freshness_horizon = horizon;
        self
    }

    pub fn with_entry_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = ttl;
        self
    }

    pub fn with_collection_interval(mut self, interval: Duration) -> Self {
        self.collection_interval = interval;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    pub fn with_layer_retries(mut self, retries: u32) -> Self {
        self.layer_retries = retries;
        self
    }

    pub fn with_recompute_on_absent(mut self, enabled: bool) -> Self {
        self.recompute_on_absent = enabled;
        self
    }

    pub fn with_history_keep(mut self, keep: usize) -> Self {
        self.history_keep = keep;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero("freshness_horizon", self.freshness_horizon)?;
        non_zero("entry_ttl", self.entry_ttl)?;
        non_zero("collection_interval", self.collection_interval)?;
        non_zero("store_timeout", self.store_timeout)?;
        non_zero("refresh_timeout", self.refresh_timeout)?;
        if self.history_keep == 0 {
            return Err(ConfigError::InvalidValue {
                field: "history_keep".to_string(),
                value: "0".to_string(),
                reason: "at least the latest table must be kept".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// AGGREGATION
// ============================================================================

/// Configuration for sector aggregation and label normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationConfig {
    /// Percentile probabilities, strictly increasing, each in `[0, 1]`.
    pub percentile_points: Vec<f64>,
    /// Extra `(alias, canonical)` pairs on top of the built-in table.
    pub sector_synonyms: Vec<(String, String)>,
    /// Whether the built-in synonym table is loaded.
    pub use_default_synonyms: bool,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            percentile_points: DEFAULT_PERCENTILE_POINTS.to_vec(),
            sector_synonyms: Vec::new(),
            use_default_synonyms: true,
        }
    }
}

impl AggregationConfig {
    /// Create AggregationConfig from environment variables.
    ///
    /// - `SECTORSCOPE_PERCENTILES`: comma-separated probabilities
    /// - `SECTORSCOPE_SECTOR_SYNONYMS`: `alias=canonical;alias=canonical`
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(points) = std::env::var("SECTORSCOPE_PERCENTILES") {
            config.percentile_points = points
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<f64>().map_err(|_| ConfigError::InvalidValue {
                        field: "SECTORSCOPE_PERCENTILES".to_string(),
                        value: s.to_string(),
                        reason: "not a number".to_string(),
                    })
                })
                .collect::<Result<_, _>>()?;
        }
        if let Ok(spec) = std::env::var("SECTORSCOPE_SECTOR_SYNONYMS") {
            config.sector_synonyms = SectorNormalizer::parse_synonym_spec(&spec)?;
        }
        Ok(config)
    }

    pub fn with_percentile_points(mut self, points: Vec<f64>) -> Self {
        self.percentile_points = points;
        self
    }

    pub fn with_synonym(mut self, alias: impl Into<String>, canonical: impl Into<String>) -> Self {
        self.sector_synonyms.push((alias.into(), canonical.into()));
        self
    }

    pub fn without_default_synonyms(mut self) -> Self {
        self.use_default_synonyms = false;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.percentile_points.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "percentile_points".to_string(),
            });
        }
        for window in self.percentile_points.windows(2) {
            if window[0] >= window[1] {
                return Err(ConfigError::InvalidValue {
                    field: "percentile_points".to_string(),
                    value: format!("{:?}", self.percentile_points),
                    reason: "must be strictly increasing".to_string(),
                });
            }
        }
        if let Some(p) = self
            .percentile_points
            .iter()
            .find(|p| !(0.0..=1.0).contains(*p))
        {
            return Err(ConfigError::InvalidValue {
                field: "percentile_points".to_string(),
                value: p.to_string(),
                reason: "must be within [0, 1]".to_string(),
            });
        }
        Ok(())
    }

    /// Build the normalizer shared by aggregation and lookups.
    pub fn normalizer(&self) -> Result<SectorNormalizer, ConfigError> {
        let mut pairs: Vec<(String, String)> = Vec::new();
        if self.use_default_synonyms {
            pairs.extend(
                crate::DEFAULT_SECTOR_SYNONYMS
                    .iter()
                    .map(|(a, b)| (a.to_string(), b.to_string())),
            );
        }
        pairs.extend(self.sector_synonyms.iter().cloned());
        SectorNormalizer::with_synonyms(pairs)
    }
}

// ============================================================================
// STORAGE
// ============================================================================

/// Locations of the durable layers.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub lmdb_map_mb: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            lmdb_map_mb: DEFAULT_LMDB_MAP_MB,
        }
    }
}

impl StorageConfig {
    /// - `SECTORSCOPE_DATA_DIR` (default: ./data)
    /// - `SECTORSCOPE_LMDB_MAP_MB` (default: 256)
    pub fn from_env() -> Self {
        Self {
            data_dir: std::env::var("SECTORSCOPE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR)),
            lmdb_map_mb: env_parse("SECTORSCOPE_LMDB_MAP_MB").unwrap_or(DEFAULT_LMDB_MAP_MB),
        }
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(STORE_DIR_NAME)
    }

    pub fn archive_path(&self) -> PathBuf {
        self.data_dir.join(ARCHIVE_FILE_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinator_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.freshness_horizon, Duration::from_secs(24 * 3600));
        assert_eq!(config.layer_retries, 1);
        assert!(!config.recompute_on_absent);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_coordinator_builder() {
        let config = CoordinatorConfig::new()
            .with_freshness_horizon(Duration::from_secs(60))
            .with_entry_ttl(Duration::from_secs(5))
            .with_collection_interval(Duration::from_secs(120))
            .with_store_timeout(Duration::from_millis(10))
            .with_refresh_timeout(Duration::from_secs(1))
            .with_layer_retries(0)
            .with_recompute_on_absent(true)
            .with_history_keep(3);

        assert_eq!(config.freshness_horizon, Duration::from_secs(60));
        assert_eq!(config.entry_ttl, Duration::from_secs(5));
        assert_eq!(config.collection_interval, Duration::from_secs(120));
        assert_eq!(config.store_timeout, Duration::from_millis(10));
        assert_eq!(config.refresh_timeout, Duration::from_secs(1));
        assert_eq!(config.layer_retries, 0);
        assert!(config.recompute_on_absent);
        assert_eq!(config.history_keep, 3);
    }

    #[test]
    fn test_coordinator_rejects_zero_horizon() {
        let config = CoordinatorConfig::new().with_freshness_horizon(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "freshness_horizon"
        ));
        let config = CoordinatorConfig::new().with_history_keep(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_aggregation_validation() {
        assert!(AggregationConfig::default().validate().is_ok());
        assert!(AggregationConfig::default()
            .with_percentile_points(vec![])
            .validate()
            .is_err());
        assert!(AggregationConfig::default()
            .with_percentile_points(vec![0.5, 0.25])
            .validate()
            .is_err());
        assert!(AggregationConfig::default()
            .with_percentile_points(vec![0.5, 1.5])
            .validate()
            .is_err());
    }

    #[test]
    fn test_aggregation_normalizer_merges_synonyms() {
        let config = AggregationConfig::default().with_synonym("반도체", "전기전자");
        let normalizer = config.normalizer().unwrap();
        assert_eq!(normalizer.normalize("반도체").unwrap().as_str(), "전기전자");
        assert_eq!(normalizer.normalize("전기·전자").unwrap().as_str(), "전기전자");

        let bare = AggregationConfig::default().without_default_synonyms();
        assert_eq!(bare.normalizer().unwrap().synonym_count(), 0);
    }

    #[test]
    fn test_storage_paths() {
        let config = StorageConfig::default().with_data_dir("/var/lib/sectorscope");
        assert_eq!(
            config.store_path(),
            PathBuf::from("/var/lib/sectorscope/store")
        );
        assert_eq!(
            config.archive_path(),
            PathBuf::from("/var/lib/sectorscope/fallback_archive.json")
        );
    }
}
