//! SECTORSCOPE Test Utilities
//!
//! Centralized test infrastructure for the SECTORSCOPE workspace:
//! - Proptest generators for records and batches
//! - Mock collectors and always-failing layers
//! - Fixtures for common scenarios
//! - Assertions for cache reads and refresh reports

// Re-export in-memory layers from their source crate
pub use sectorscope_storage::{MockArchive, MockPersistentStore};

// Re-export core types for convenience
pub use sectorscope_core::{
    CollectionError, FreshnessState, Layer, ManualClock, PersistenceError, RefreshStage,
    RefreshStatus, ScopeError, ScopeResult, SnapshotBatch, SnapshotRecord, StatisticsTable,
    Timestamp, ValuationField,
};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sectorscope_core::{Clock, SystemClock};
use sectorscope_storage::{
    FallbackArchive, HistoryEntry, PersistentStore, SnapshotCollector, StoredStatistics,
};

// ============================================================================
// MOCK COLLECTOR
// ============================================================================

/// Scripted [`SnapshotCollector`].
///
/// Counts calls, can sleep before answering, and can be switched to fail.
/// Each call builds a fresh batch from the configured records, stamped with
/// the clock's current time.
pub struct MockCollector {
    records: Vec<SnapshotRecord>,
    clock: Arc<dyn Clock>,
    delay: Duration,
    failure: Mutex<Option<CollectionError>>,
    calls: AtomicUsize,
}

impl MockCollector {
    pub fn new(records: Vec<SnapshotRecord>) -> Self {
        Self {
            records,
            clock: Arc::new(SystemClock),
            delay: Duration::ZERO,
            failure: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(self, error: CollectionError) -> Self {
        self.set_failure(Some(error));
        self
    }

    /// Switch failure on (`Some`) or off (`None`) for later calls.
    pub fn set_failure(&self, error: Option<CollectionError>) {
        let mut guard = self.failure.lock().unwrap_or_else(|p| p.into_inner());
        *guard = error;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotCollector for MockCollector {
    fn provider(&self) -> &str {
        "mock"
    }

    async fn collect_snapshot_batch(&self) -> Result<SnapshotBatch, CollectionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let failure = self
            .failure
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        if let Some(error) = failure {
            return Err(error);
        }

        let now = self.clock.now();
        let records = self
            .records
            .iter()
            .cloned()
            .map(|mut r| {
                r.collected_at = now;
                r
            })
            .collect();
        SnapshotBatch::new(now, records).map_err(|e| CollectionError::Malformed {
            provider: self.provider().to_string(),
            reason: e.to_string(),
        })
    }
}

// ============================================================================
// FAILING LAYERS
// ============================================================================

/// [`PersistentStore`] that fails every call, optionally after hanging.
#[derive(Debug, Clone, Default)]
pub struct FailingStore {
    hang: Option<Duration>,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long before failing, to exercise call timeouts.
    pub fn hanging(duration: Duration) -> Self {
        Self {
            hang: Some(duration),
        }
    }

    async fn fail<T>(&self, operation: &'static str) -> Result<T, PersistenceError> {
        if let Some(hang) = self.hang {
            tokio::time::sleep(hang).await;
        }
        Err(PersistenceError::failed(Layer::Persistent, operation, "store unreachable"))
    }
}

#[async_trait]
impl PersistentStore for FailingStore {
    async fn save_snapshot_batch(&self, _batch: &SnapshotBatch) -> Result<(), PersistenceError> {
        self.fail("save_snapshot_batch").await
    }

    async fn save_sector_statistics(
        &self,
        _table: &StatisticsTable,
        _computed_at: Timestamp,
    ) -> Result<(), PersistenceError> {
        self.fail("save_sector_statistics").await
    }

    async fn load_sector_statistics(&self) -> Result<Option<StoredStatistics>, PersistenceError> {
        self.fail("load_sector_statistics").await
    }

    async fn load_latest_snapshot_batch(&self) -> Result<Option<SnapshotBatch>, PersistenceError> {
        self.fail("load_latest_snapshot_batch").await
    }

    async fn statistics_history(&self, _limit: usize) -> Result<Vec<HistoryEntry>, PersistenceError> {
        self.fail("statistics_history").await
    }

    async fn prune_history(&self, _keep: usize) -> Result<usize, PersistenceError> {
        self.fail("prune_history").await
    }
}

/// [`FallbackArchive`] that fails every call, optionally after hanging.
#[derive(Debug, Clone, Default)]
pub struct FailingArchive {
    hang: Option<Duration>,
}

impl FailingArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hanging(duration: Duration) -> Self {
        Self {
            hang: Some(duration),
        }
    }

    async fn fail<T>(&self, operation: &'static str) -> Result<T, PersistenceError> {
        if let Some(hang) = self.hang {
            tokio::time::sleep(hang).await;
        }
        Err(PersistenceError::failed(Layer::Archive, operation, "archive unreadable"))
    }
}

#[async_trait]
impl FallbackArchive for FailingArchive {
    async fn save(
        &self,
        _table: &StatisticsTable,
        _computed_at: Timestamp,
    ) -> Result<(), PersistenceError> {
        self.fail("save").await
    }

    async fn load(&self) -> Result<Option<StoredStatistics>, PersistenceError> {
        self.fail("load").await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for snapshot records and batches.

    use super::*;
    use proptest::prelude::*;

    /// Raw labels including spacing, full-width and separator variants.
    pub const LABEL_POOL: [&str; 8] = [
        "전기전자",
        "전기·전자",
        " 전기전자 ",
        "금융",
        "금융업",
        "화학",
        "ＩＴ 서비스",
        "IT 서비스",
    ];

    /// Generate a Timestamp between 2020 and 2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64)
            .prop_map(|secs| chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now))
    }

    /// A field value: usually finite, sometimes explicitly missing or NaN.
    pub fn arb_field_value() -> impl Strategy<Value = Option<f64>> {
        prop_oneof![
            6 => (-50.0f64..200.0).prop_map(Some),
            1 => Just(None),
            1 => Just(Some(f64::NAN)),
        ]
    }

    /// One record with a label drawn from [`LABEL_POOL`]. The id is a
    /// placeholder; [`arb_batch`] rewrites ids to be unique.
    pub fn arb_snapshot_record() -> impl Strategy<Value = SnapshotRecord> {
        (
            prop::sample::select(LABEL_POOL.to_vec()),
            arb_field_value(),
            arb_field_value(),
            any::<bool>(),
            arb_timestamp(),
        )
            .prop_map(|(label, per, pbr, has_pbr, at)| {
                let record = SnapshotRecord::new("000000", label, at).with_field(ValuationField::PER, per);
                if has_pbr {
                    record.with_field(ValuationField::PBR, pbr)
                } else {
                    record
                }
            })
    }

    /// A valid batch of 1..60 records with unique instrument ids.
    pub fn arb_batch() -> impl Strategy<Value = SnapshotBatch> {
        (prop::collection::vec(arb_snapshot_record(), 1..60), arb_timestamp()).prop_filter_map(
            "batch must validate",
            |(records, at)| {
                let records = records
                    .into_iter()
                    .enumerate()
                    .map(|(i, mut r)| {
                        r.instrument_id = format!("{:06}", i);
                        r.collected_at = at;
                        r
                    })
                    .collect();
                SnapshotBatch::new(at, records).ok()
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;
    use sectorscope_aggregate::SectorStatisticsAggregator;
    use sectorscope_core::AggregationConfig;

    /// Fixed reference instant used across tests.
    pub fn reference_time() -> Timestamp {
        Utc.with_ymd_and_hms(2026, 10, 17, 6, 0, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// `n` 전기전자 records with strictly increasing PER (5.0, 5.25, ...)
    /// and PBR missing on every third record.
    pub fn electronics_records(n: usize, at: Timestamp) -> Vec<SnapshotRecord> {
        (0..n)
            .map(|i| {
                let pbr = (i % 3 != 0).then(|| 0.5 + i as f64 * 0.01);
                SnapshotRecord::new(format!("{:06}", i), "전기전자", at)
                    .with_field(ValuationField::PER, Some(5.0 + i as f64 * 0.25))
                    .with_field(ValuationField::PBR, pbr)
            })
            .collect()
    }

    pub fn electronics_batch(n: usize) -> SnapshotBatch {
        let at = reference_time();
        SnapshotBatch::new(at, electronics_records(n, at))
            .unwrap_or_else(|e| panic!("fixture batch invalid: {}", e))
    }

    /// Records spread over three sectors, with raw label variants.
    pub fn mixed_records(at: Timestamp) -> Vec<SnapshotRecord> {
        let mut records = electronics_records(20, at);
        for i in 0..10 {
            let label = if i % 2 == 0 { "금융" } else { "\u{3000}금융" };
            records.push(
                SnapshotRecord::new(format!("F{:05}", i), label, at)
                    .with_field(ValuationField::PER, Some(3.0 + i as f64))
                    .with_field(ValuationField::PBR, Some(0.3 + i as f64 * 0.05)),
            );
        }
        records.push(
            SnapshotRecord::new("C00001", "화학", at).with_field(ValuationField::PER, Some(11.0)),
        );
        records
    }

    pub fn default_aggregator() -> SectorStatisticsAggregator {
        SectorStatisticsAggregator::new(&AggregationConfig::default())
            .unwrap_or_else(|e| panic!("default aggregation config invalid: {}", e))
    }

    /// A statistics table over [`mixed_records`], computed at `computed_at`.
    pub fn table_computed_at(computed_at: Timestamp) -> StatisticsTable {
        let batch = SnapshotBatch::new(computed_at, mixed_records(computed_at))
            .unwrap_or_else(|e| panic!("fixture batch invalid: {}", e));
        default_aggregator()
            .aggregate_batch(&batch, computed_at)
            .unwrap_or_else(|e| panic!("fixture aggregation failed: {}", e))
            .table
    }

    pub fn stored_computed_at(computed_at: Timestamp) -> StoredStatistics {
        StoredStatistics::new(table_computed_at(computed_at), computed_at)
    }

    pub fn manual_clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(reference_time()))
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for refresh reports and statistics tables.

    use super::*;
    use sectorscope_storage::RefreshReport;

    #[track_caller]
    pub fn assert_status(report: &RefreshReport, expected: RefreshStatus) {
        assert_eq!(
            report.status, expected,
            "unexpected refresh status; warnings: {:?}, error: {:?}",
            report.warnings, report.error
        );
    }

    /// Assert the run failed at `stage` with the given retryable flag.
    #[track_caller]
    pub fn assert_failed_at(report: &RefreshReport, stage: RefreshStage, retryable: bool) {
        assert_status(report, RefreshStatus::Failed);
        assert_eq!(report.failed_stage, Some(stage), "wrong failed stage");
        assert_eq!(report.retryable, retryable, "wrong retryable classification");
    }

    /// Assert every field's breakpoints are non-decreasing and within the
    /// field's observed range.
    #[track_caller]
    pub fn assert_breakpoints_ordered(table: &StatisticsTable) {
        for stats in table.sectors.values() {
            for (field, percentiles) in &stats.percentiles {
                let values: Vec<f64> = percentiles.values().collect();
                for pair in values.windows(2) {
                    assert!(
                        pair[0] <= pair[1],
                        "{} {} breakpoints out of order: {:?}",
                        stats.sector,
                        field,
                        values
                    );
                }
                assert!(
                    percentiles.present_count <= stats.sample_size,
                    "{} {} present_count exceeds sample_size",
                    stats.sector,
                    field
                );
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_electronics_fixture_shape() {
        let batch = fixtures::electronics_batch(171);
        assert_eq!(batch.len(), 171);
        assert_eq!(batch.records[0].field(&ValuationField::new(ValuationField::PBR)), None);
        assert!(batch.records[1].field(&ValuationField::new(ValuationField::PBR)).is_some());
    }

    #[test]
    fn test_table_fixture_merges_synonyms() {
        let table = fixtures::table_computed_at(fixtures::reference_time());
        assert_eq!(table.sector_count(), 3);
        assert_eq!(table.total_samples(), 31);
        assertions::assert_breakpoints_ordered(&table);
    }

    #[tokio::test]
    async fn test_mock_collector_counts_and_fails() {
        let collector = MockCollector::new(fixtures::electronics_records(3, Utc::now()));
        assert_eq!(collector.collect_snapshot_batch().await.unwrap().len(), 3);

        collector.set_failure(Some(CollectionError::RateLimited {
            provider: "mock".to_string(),
            retry_after_ms: 10,
        }));
        assert!(collector.collect_snapshot_batch().await.unwrap_err().is_retryable());
        assert_eq!(collector.call_count(), 2);
    }

    #[tokio::test]
    async fn test_failing_layers_fail() {
        assert!(FailingStore::new().load_sector_statistics().await.is_err());
        let err = FailingArchive::new().load().await.unwrap_err();
        assert_eq!(err.layer(), Layer::Archive);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_generated_batches_are_valid(batch in generators::arb_batch()) {
            prop_assert!(!batch.is_empty());
            let mut ids: Vec<_> = batch.records.iter().map(|r| r.instrument_id.clone()).collect();
            ids.dedup();
            prop_assert_eq!(ids.len(), batch.len());
        }
    }
}
