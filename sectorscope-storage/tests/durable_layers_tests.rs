//! End-to-end tests over the real durable layers
//!
//! Tests verify:
//! - A refresh lands in both LMDB and the archive file
//! - A restarted process reads what the previous one wrote
//! - A corrupt archive is skipped while the store answers
//! - Losing the store falls back to the archive
//! - The collector file feeds the whole pipeline

use std::sync::Arc;
use std::time::Duration;

use sectorscope_aggregate::SectorStatisticsAggregator;
use sectorscope_core::{
    AggregationConfig, CoordinatorConfig, FreshnessState, Layer, PersistenceError, RefreshStatus,
    StorageConfig,
};
use sectorscope_storage::{
    CacheCoordinator, FallbackArchive, FileArchive, JsonFileCollector, LmdbPersistentStore,
    PersistentStore, RefreshRequest,
};
use sectorscope_test_utils::assertions::assert_status;
use sectorscope_test_utils::fixtures::{manual_clock, mixed_records, reference_time};
use sectorscope_test_utils::{ManualClock, MockCollector};
use tempfile::TempDir;

fn coordinator(
    storage: &StorageConfig,
    clock: &Arc<ManualClock>,
) -> (Arc<CacheCoordinator>, FileArchive) {
    let store = LmdbPersistentStore::from_config(storage).unwrap();
    let archive = FileArchive::new(storage.archive_path());
    let aggregator = SectorStatisticsAggregator::new(&AggregationConfig::default()).unwrap();
    let coordinator = CacheCoordinator::new(
        Arc::new(store),
        Arc::new(archive.clone()),
        aggregator,
        CoordinatorConfig::default(),
    )
    .unwrap()
    .with_clock(clock.clone());
    (Arc::new(coordinator), archive)
}

fn storage(dir: &TempDir) -> StorageConfig {
    StorageConfig::default().with_data_dir(dir.path())
}

#[tokio::test]
async fn test_refresh_writes_both_layers_and_survives_restart() {
    let dir = TempDir::new().unwrap();
    let storage = storage(&dir);
    let clock = manual_clock();

    let batch_id = {
        let (coordinator, archive) = coordinator(&storage, &clock);
        let collector = Arc::new(MockCollector::new(mixed_records(reference_time())).with_clock(clock.clone()));
        let report = coordinator
            .generate(collector, RefreshRequest::force("test"))
            .await
            .unwrap();
        assert_status(&report, RefreshStatus::Success);

        let archived = archive.load().await.unwrap().unwrap();
        assert_eq!(Some(archived.table.batch_id), report.batch_id);
        report.batch_id.unwrap()
    };

    // New process: nothing in memory, same data directory.
    clock.advance(Duration::from_secs(2 * 3600));
    let (coordinator, _archive) = coordinator(&storage, &clock);
    let read = coordinator.get_all_sector_statistics().await;
    assert_eq!(read.state(), FreshnessState::Fresh);
    assert_eq!(read.layer(), Some(Layer::Persistent));
    assert_eq!(read.table().unwrap().batch_id, batch_id);
    assert_eq!(read.age(), Some(Duration::from_secs(2 * 3600)));

    let history = coordinator.statistics_history(5).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].batch_id, batch_id);
}

#[tokio::test]
async fn test_corrupt_archive_does_not_hide_store() {
    let dir = TempDir::new().unwrap();
    let storage = storage(&dir);
    let clock = manual_clock();
    let (coordinator, archive) = coordinator(&storage, &clock);

    let collector = Arc::new(MockCollector::new(mixed_records(reference_time())).with_clock(clock.clone()));
    coordinator
        .generate(collector, RefreshRequest::force("test"))
        .await
        .unwrap();

    std::fs::write(archive.path(), b"{ truncated").unwrap();
    assert!(matches!(
        archive.load().await,
        Err(PersistenceError::Corrupted { .. })
    ));

    let read = coordinator.get_all_sector_statistics().await;
    assert_eq!(read.layer(), Some(Layer::Persistent));
    assert!(read.layer_failures().is_empty());
}

#[tokio::test]
async fn test_lost_store_falls_back_to_archive() {
    let dir = TempDir::new().unwrap();
    let storage = storage(&dir);
    let clock = manual_clock();

    {
        let (coordinator, _archive) = coordinator(&storage, &clock);
        let collector = Arc::new(MockCollector::new(mixed_records(reference_time())).with_clock(clock.clone()));
        coordinator
            .generate(collector, RefreshRequest::force("test"))
            .await
            .unwrap();
    }

    std::fs::remove_dir_all(storage.store_path()).unwrap();
    clock.advance(Duration::from_secs(30 * 3600));

    let (coordinator, _archive) = coordinator(&storage, &clock);
    let read = coordinator.get_all_sector_statistics().await;
    assert_eq!(read.layer(), Some(Layer::Archive));
    assert_eq!(read.state(), FreshnessState::Stale);
    assert!(read.warning().is_some());
}

#[tokio::test]
async fn test_json_file_collector_end_to_end() {
    let dir = TempDir::new().unwrap();
    let storage = storage(&dir);
    let clock = manual_clock();
    let input = dir.path().join("snapshot.json");
    std::fs::write(
        &input,
        r#"{
            "collected_at": "2026-10-17T06:00:00Z",
            "records": [
                {"instrument_id": "005930", "sector_label": "전기전자", "valuation_fields": {"PER": 12.0, "PBR": 1.1}},
                {"instrument_id": "000660", "sector_label": "전기·전자", "valuation_fields": {"PER": 8.0, "PBR": null}},
                {"instrument_id": "066570", "sector_label": "ＩＴ 서비스", "valuation_fields": {"PER": 20.0}},
                {"instrument_id": "999999", "sector_label": "   ", "valuation_fields": {"PER": 1.0}}
            ]
        }"#,
    )
    .unwrap();

    let (coordinator, _archive) = coordinator(&storage, &clock);
    let collector = Arc::new(JsonFileCollector::new(&input).with_clock(clock.clone()));
    let report = coordinator
        .generate(collector, RefreshRequest::force("test"))
        .await
        .unwrap();

    assert_status(&report, RefreshStatus::Success);
    assert_eq!(report.record_count, 4);
    assert_eq!(report.sector_count, 2);
    assert_eq!(report.skipped_records.len(), 1);
    assert_eq!(report.skipped_records[0].instrument_id, "999999");

    let electronics = coordinator.get_sector_statistics("전기 전자").await.unwrap();
    let stats = electronics.statistics().unwrap();
    assert_eq!(stats.sample_size, 2);
    assert_eq!(stats.field("PER").unwrap().median(), Some(10.0));
    assert_eq!(stats.field("PBR").unwrap().present_count, 1);

    let it = coordinator.get_sector_statistics("IT서비스").await.unwrap();
    assert!(it.is_available());
}

#[tokio::test]
async fn test_regenerate_after_restart_uses_persisted_batch() {
    let dir = TempDir::new().unwrap();
    let storage = storage(&dir);
    let clock = manual_clock();

    {
        let store = LmdbPersistentStore::from_config(&storage).unwrap();
        let batch = sectorscope_core::SnapshotBatch::new(reference_time(), mixed_records(reference_time())).unwrap();
        store.save_snapshot_batch(&batch).await.unwrap();
    }

    let (coordinator, archive) = coordinator(&storage, &clock);
    assert!(coordinator.get_all_sector_statistics().await.is_absent());

    let report = coordinator.regenerate_from_stored_batch().await.unwrap();
    assert_status(&report, RefreshStatus::Success);
    assert!(archive.load().await.unwrap().is_some());
    assert!(coordinator.get_all_sector_statistics().await.is_fresh());
}
