//! Snapshot collection seam.
//!
//! The provider logic that talks to a market-data API lives outside this
//! workspace. The coordinator only sees [`SnapshotCollector`].

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use sectorscope_core::{
    Clock, CollectionError, SnapshotBatch, SnapshotRecord, SystemClock, Timestamp, ValuationField,
};
use serde::Deserialize;

/// Produces one complete snapshot batch per call.
///
/// Errors carry their own retryable classification, which is passed
/// through to the refresh report unchanged.
#[async_trait]
pub trait SnapshotCollector: Send + Sync {
    /// Name used in logs and errors.
    fn provider(&self) -> &str;

    async fn collect_snapshot_batch(&self) -> Result<SnapshotBatch, CollectionError>;
}

// ============================================================================
// JSON FILE COLLECTOR
// ============================================================================

#[derive(Debug, Deserialize)]
struct SnapshotFile {
    collected_at: Option<Timestamp>,
    records: Vec<RecordRow>,
}

#[derive(Debug, Deserialize)]
struct RecordRow {
    instrument_id: String,
    sector_label: String,
    #[serde(default)]
    valuation_fields: BTreeMap<ValuationField, Option<f64>>,
    collected_at: Option<Timestamp>,
}

/// Reads a snapshot batch exported by an external collection job.
///
/// Accepted layout:
///
/// ```json
/// {
///   "collected_at": "2026-10-17T06:00:00Z",
///   "records": [
///     { "instrument_id": "005930", "sector_label": "전기전자",
///       "valuation_fields": { "PER": 12.4, "PBR": null } }
///   ]
/// }
/// ```
///
/// `collected_at` may be omitted at either level; the clock fills it in.
pub struct JsonFileCollector {
    path: PathBuf,
    clock: Arc<dyn Clock>,
}

impl JsonFileCollector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse(&self, bytes: &[u8]) -> Result<SnapshotBatch, CollectionError> {
        let file: SnapshotFile =
            serde_json::from_slice(bytes).map_err(|e| self.malformed(e.to_string()))?;
        let collected_at = file.collected_at.unwrap_or_else(|| self.clock.now());
        let records = file
            .records
            .into_iter()
            .map(|row| SnapshotRecord {
                instrument_id: row.instrument_id,
                sector_label: row.sector_label,
                valuation_fields: row.valuation_fields,
                collected_at: row.collected_at.unwrap_or(collected_at),
            })
            .collect();
        SnapshotBatch::new(collected_at, records).map_err(|e| self.malformed(e.to_string()))
    }

    fn malformed(&self, reason: String) -> CollectionError {
        CollectionError::Malformed {
            provider: self.provider().to_string(),
            reason,
        }
    }
}

#[async_trait]
impl SnapshotCollector for JsonFileCollector {
    fn provider(&self) -> &str {
        "json-file"
    }

    async fn collect_snapshot_batch(&self) -> Result<SnapshotBatch, CollectionError> {
        let path = self.path.clone();
        let read = tokio::task::spawn_blocking(move || std::fs::read(path))
            .await
            .map_err(|e| CollectionError::Unavailable {
                provider: self.provider().to_string(),
                reason: e.to_string(),
            })?;

        let bytes = match read {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CollectionError::Rejected {
                    provider: self.provider().to_string(),
                    reason: format!("{} does not exist", self.path.display()),
                })
            }
            Err(e) => {
                return Err(CollectionError::Unavailable {
                    provider: self.provider().to_string(),
                    reason: e.to_string(),
                })
            }
        };

        let batch = self.parse(&bytes)?;
        tracing::info!(
            provider = self.provider(),
            path = %self.path.display(),
            records = batch.len(),
            "collected snapshot batch"
        );
        Ok(batch)
    }
}
