//! The cache coordinator.
//!
//! Reads resolve through an ordered chain of layers on every call. The chain
//! is persistent store, then fallback archive, then (optionally) recompute
//! from the stored snapshot batch. Nothing on the read path is memoized, so
//! a table written by a refresh is visible to the very next read.
//!
//! Refreshes are single-flight. A trigger that arrives while a run is in
//! flight joins it and receives the same report. The run body executes in
//! its own task, so a caller that gives up waiting never cancels a
//! half-written refresh.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use sectorscope_aggregate::{BatchAggregation, SectorStatisticsAggregator};
use sectorscope_core::constants::PROGRESS_CHANNEL_CAPACITY;
use sectorscope_core::{
    Clock, CoordinatorConfig, FreshnessState, HealthCheck, HealthStatus, InsufficientDataError,
    Layer, PersistenceError, RefreshStage, ScopeError, ScopeResult, SectorNormalizer, SnapshotBatch,
    SystemClock, Timestamp,
};
use tokio::sync::{broadcast, watch, Mutex as AsyncMutex};
use uuid::Uuid;

use super::freshness::{classify, CacheEntry, SectorRead, StatisticsRead};
use super::report::{
    RefreshMode, RefreshProgress, RefreshReport, RefreshRequest, ReportBuilder, StageStatus,
};
use crate::{FallbackArchive, HistoryEntry, PersistentStore, SnapshotCollector, StoredStatistics};

// ============================================================================
// LAYER CHAIN
// ============================================================================

/// One step of the read resolution chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    Persistent,
    Archive,
    /// Re-aggregate the latest stored snapshot batch.
    Recompute,
}

impl LayerKind {
    /// The layer tag attached to data served by this step.
    pub fn layer(&self) -> Layer {
        match self {
            LayerKind::Persistent => Layer::Persistent,
            LayerKind::Archive => Layer::Archive,
            LayerKind::Recompute => Layer::Computed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LayerKind::Persistent => "persistent",
            LayerKind::Archive => "archive",
            LayerKind::Recompute => "recompute",
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answer of a single chain step.
#[derive(Debug, Clone)]
pub enum LayerLookup {
    Hit(Arc<StoredStatistics>),
    Absent,
    Failed(PersistenceError),
}

// ============================================================================
// HEALTH
// ============================================================================

/// Health of the cache as a whole plus one check per durable layer.
#[derive(Debug, Clone)]
pub struct CacheHealth {
    pub status: HealthStatus,
    pub state: FreshnessState,
    pub layer: Option<Layer>,
    pub computed_at: Option<Timestamp>,
    pub age: Option<Duration>,
    pub checks: Vec<HealthCheck>,
    pub last_refresh: Option<Arc<RefreshReport>>,
}

// ============================================================================
// COORDINATOR
// ============================================================================

#[derive(Debug, Clone)]
enum RunState {
    Running(RefreshStage),
    Done(Arc<RefreshReport>),
}

/// The run currently occupying the single-flight slot.
struct InFlight {
    seq: u64,
    mode: RefreshMode,
    rx: watch::Receiver<RunState>,
}

impl InFlight {
    /// A running `Force` run satisfies any request. A running `IfStale` run
    /// may skip, so it only satisfies another `IfStale` request.
    fn joinable_by(&self, mode: RefreshMode) -> bool {
        let running = self.rx.has_changed().is_ok()
            && !matches!(*self.rx.borrow(), RunState::Done(_));
        running && (self.mode == RefreshMode::Force || mode == RefreshMode::IfStale)
    }
}

enum RunSource {
    Collector(Arc<dyn SnapshotCollector>),
    StoredBatch,
}

/// Resolves sector statistics across the durable layers and runs refreshes.
pub struct CacheCoordinator {
    store: Arc<dyn PersistentStore>,
    archive: Arc<dyn FallbackArchive>,
    aggregator: SectorStatisticsAggregator,
    config: CoordinatorConfig,
    clock: Arc<dyn Clock>,
    chain: Vec<LayerKind>,
    /// Last resolved or refreshed entry. Only `peek_latest` reads it.
    latest: RwLock<Option<CacheEntry>>,
    last_report: RwLock<Option<Arc<RefreshReport>>>,
    in_flight: Mutex<Option<InFlight>>,
    run_seq: AtomicU64,
    run_lock: AsyncMutex<()>,
    progress: broadcast::Sender<RefreshProgress>,
}

impl fmt::Debug for CacheCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheCoordinator")
            .field("chain", &self.chain)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CacheCoordinator {
    /// Create a coordinator over the given layers.
    ///
    /// The chain is persistent then archive, with recompute appended when
    /// `recompute_on_absent` is set.
    pub fn new(
        store: Arc<dyn PersistentStore>,
        archive: Arc<dyn FallbackArchive>,
        aggregator: SectorStatisticsAggregator,
        config: CoordinatorConfig,
    ) -> ScopeResult<Self> {
        config.validate()?;

        let mut chain = vec![LayerKind::Persistent, LayerKind::Archive];
        if config.recompute_on_absent {
            chain.push(LayerKind::Recompute);
        }
        let (progress, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);

        Ok(Self {
            store,
            archive,
            aggregator,
            config,
            clock: Arc::new(SystemClock),
            chain,
            latest: RwLock::new(None),
            last_report: RwLock::new(None),
            in_flight: Mutex::new(None),
            run_seq: AtomicU64::new(0),
            run_lock: AsyncMutex::new(()),
            progress,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the resolution chain.
    pub fn with_chain(mut self, chain: Vec<LayerKind>) -> Self {
        self.chain = chain;
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn chain(&self) -> &[LayerKind] {
        &self.chain
    }

    /// Normalizer shared by aggregation and per-sector lookups.
    pub fn normalizer(&self) -> &SectorNormalizer {
        self.aggregator.normalizer()
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<RefreshProgress> {
        self.progress.subscribe()
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Resolve the full statistics table through the chain.
    pub async fn get_all_sector_statistics(&self) -> StatisticsRead {
        self.resolve().await
    }

    /// Resolve statistics for one sector. The label is normalized first.
    pub async fn get_sector_statistics(&self, sector_label: &str) -> ScopeResult<SectorRead> {
        let sector = self.aggregator.normalizer().normalize(sector_label)?;
        let read = self.resolve().await;
        Ok(read.sector(sector))
    }

    /// Last entry made by a read or refresh, while it has not expired.
    ///
    /// Does no I/O. The read path never consults this.
    pub fn peek_latest(&self) -> Option<CacheEntry> {
        let now = self.clock.now();
        self.latest
            .read()
            .ok()
            .and_then(|entry| entry.clone())
            .filter(|entry| !entry.is_expired(now))
    }

    /// Report of the most recent finished refresh run.
    pub fn last_refresh(&self) -> Option<Arc<RefreshReport>> {
        self.last_report.read().ok().and_then(|r| r.clone())
    }

    pub fn is_refreshing(&self) -> bool {
        self.in_flight
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Saved tables from the persistent store, newest first.
    pub async fn statistics_history(&self, limit: usize) -> ScopeResult<Vec<HistoryEntry>> {
        Ok(self
            .call_layer(Layer::Persistent, "statistics_history", || {
                self.store.statistics_history(limit)
            })
            .await?)
    }

    async fn resolve(&self) -> StatisticsRead {
        let mut failures = Vec::new();
        for kind in &self.chain {
            match self.lookup(*kind).await {
                LayerLookup::Hit(stored) => {
                    let now = self.clock.now();
                    let read = StatisticsRead::hit(
                        Arc::clone(&stored),
                        kind.layer(),
                        now,
                        self.config.freshness_horizon,
                        failures,
                    );
                    if let Some(warning) = read.warning() {
                        tracing::warn!(layer = %kind, age_secs = warning.age.as_secs(), "{}", warning);
                    } else {
                        tracing::debug!(layer = %kind, state = %read.state(), "resolved sector statistics");
                    }
                    self.remember(CacheEntry::table(stored, kind.layer(), now, self.config.entry_ttl));
                    return read;
                }
                LayerLookup::Absent => {
                    tracing::debug!(layer = %kind, "layer has no statistics");
                }
                LayerLookup::Failed(e) => {
                    tracing::warn!(layer = %kind, error = %e, "layer read failed, falling through");
                    failures.push(e);
                }
            }
        }

        if failures.is_empty() {
            tracing::debug!("no layer has sector statistics");
        } else {
            tracing::error!(failed_layers = failures.len(), "sector statistics absent after layer failures");
        }
        self.remember(CacheEntry::absent(self.clock.now(), self.config.entry_ttl));
        StatisticsRead::absent(failures)
    }

    async fn lookup(&self, kind: LayerKind) -> LayerLookup {
        let result = match kind {
            LayerKind::Persistent => {
                self.call_layer(Layer::Persistent, "load_sector_statistics", || {
                    self.store.load_sector_statistics()
                })
                .await
            }
            LayerKind::Archive => {
                self.call_layer(Layer::Archive, "load", || self.archive.load())
                    .await
            }
            LayerKind::Recompute => self.recompute().await,
        };
        match result {
            Ok(Some(stored)) if !stored.table.is_empty() => LayerLookup::Hit(Arc::new(stored)),
            Ok(_) => LayerLookup::Absent,
            Err(e) => LayerLookup::Failed(e),
        }
    }

    /// Aggregate the stored batch in memory. Stamped with the batch's
    /// collection time so freshness reflects the data, not the arithmetic.
    async fn recompute(&self) -> Result<Option<StoredStatistics>, PersistenceError> {
        let batch = self
            .call_layer(Layer::Persistent, "load_latest_snapshot_batch", || {
                self.store.load_latest_snapshot_batch()
            })
            .await?;
        let Some(batch) = batch else {
            return Ok(None);
        };
        match self.aggregator.aggregate_batch(&batch, batch.collected_at) {
            Ok(BatchAggregation { table, .. }) => {
                tracing::info!(batch_id = %batch.batch_id, sectors = table.sector_count(), "recomputed statistics from stored batch");
                Ok(Some(StoredStatistics::new(table, batch.collected_at)))
            }
            Err(InsufficientDataError) => Ok(None),
        }
    }

    fn remember(&self, entry: CacheEntry) {
        if let Ok(mut latest) = self.latest.write() {
            *latest = Some(entry);
        }
    }

    /// Run a durable-layer read with a per-attempt timeout and bounded retries.
    async fn call_layer<T, F, Fut>(
        &self,
        layer: Layer,
        operation: &'static str,
        call: F,
    ) -> Result<T, PersistenceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PersistenceError>>,
    {
        self.attempt_layer(layer, operation, true, call).await
    }

    /// Like [`Self::call_layer`], but a timed-out write is not retried: the
    /// abandoned attempt may still commit on the blocking pool.
    async fn write_layer<T, F, Fut>(
        &self,
        layer: Layer,
        operation: &'static str,
        call: F,
    ) -> Result<T, PersistenceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PersistenceError>>,
    {
        self.attempt_layer(layer, operation, false, call).await
    }

    async fn attempt_layer<T, F, Fut>(
        &self,
        layer: Layer,
        operation: &'static str,
        retry_timeouts: bool,
        mut call: F,
    ) -> Result<T, PersistenceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PersistenceError>>,
    {
        let timeout = self.config.store_timeout;
        let attempts = self.config.layer_retries.saturating_add(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match tokio::time::timeout(timeout, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => PersistenceError::Timeout {
                    layer,
                    operation,
                    timeout,
                },
            };
            let timed_out = matches!(error, PersistenceError::Timeout { .. });
            if attempt >= attempts || (timed_out && !retry_timeouts) {
                return Err(error);
            }
            tracing::debug!(%layer, operation, attempt, error = %error, "retrying layer call");
        }
    }

    // ------------------------------------------------------------------------
    // Refresh
    // ------------------------------------------------------------------------

    /// Collect, aggregate and persist a new table.
    ///
    /// Joins the in-flight run if there is one. The returned report is
    /// shared by every trigger that joined the same run. Errors only when
    /// the wait exceeds `refresh_timeout` or the run task died.
    pub async fn generate(
        self: &Arc<Self>,
        collector: Arc<dyn SnapshotCollector>,
        request: RefreshRequest,
    ) -> ScopeResult<Arc<RefreshReport>> {
        self.trigger(RunSource::Collector(collector), request).await
    }

    /// Re-aggregate the latest stored snapshot batch without collecting.
    pub async fn regenerate_from_stored_batch(self: &Arc<Self>) -> ScopeResult<Arc<RefreshReport>> {
        self.trigger(RunSource::StoredBatch, RefreshRequest::force("regenerate"))
            .await
    }

    async fn trigger(
        self: &Arc<Self>,
        source: RunSource,
        request: RefreshRequest,
    ) -> ScopeResult<Arc<RefreshReport>> {
        let mut rx = {
            let mut slot = self.in_flight.lock().map_err(|_| ScopeError::RefreshAborted {
                stage: RefreshStage::Collect,
                reason: "in-flight slot lock poisoned".to_string(),
            })?;
            let joinable = slot
                .as_ref()
                .filter(|running| running.joinable_by(request.mode))
                .map(|running| running.rx.clone());
            match joinable {
                Some(rx) => {
                    tracing::info!(trigger = %request.trigger, mode = %request.mode, "joining in-flight refresh");
                    rx
                }
                None => {
                    if slot.is_some() {
                        tracing::info!(trigger = %request.trigger, mode = %request.mode, "in-flight run may skip, queueing a new run");
                    }
                    let seq = self.run_seq.fetch_add(1, Ordering::SeqCst);
                    let (tx, rx) = watch::channel(RunState::Running(RefreshStage::Collect));
                    *slot = Some(InFlight {
                        seq,
                        mode: request.mode,
                        rx: rx.clone(),
                    });
                    let this = Arc::clone(self);
                    tokio::spawn(async move {
                        let report = Arc::new(this.run(source, request, &tx).await);
                        this.finish_run(seq, &report);
                        // Release the layers before waiters wake up.
                        drop(this);
                        tx.send_replace(RunState::Done(report));
                    });
                    rx
                }
            }
        };

        let timeout = self.config.refresh_timeout;
        let wait = async move {
            loop {
                if let RunState::Done(report) = &*rx.borrow_and_update() {
                    return Ok(Arc::clone(report));
                }
                if rx.changed().await.is_err() {
                    return match &*rx.borrow() {
                        RunState::Done(report) => Ok(Arc::clone(report)),
                        RunState::Running(stage) => Err(ScopeError::RefreshAborted {
                            stage: *stage,
                            reason: "refresh task ended without a report".to_string(),
                        }),
                    };
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| ScopeError::Timeout {
                operation: "refresh",
                timeout,
            })?
    }

    fn finish_run(&self, seq: u64, report: &Arc<RefreshReport>) {
        if let Ok(mut last) = self.last_report.write() {
            *last = Some(Arc::clone(report));
        }
        // A queued run may already own the slot.
        if let Ok(mut slot) = self.in_flight.lock() {
            if slot.as_ref().is_some_and(|running| running.seq == seq) {
                *slot = None;
            }
        }
    }

    async fn run(
        &self,
        source: RunSource,
        request: RefreshRequest,
        tx: &watch::Sender<RunState>,
    ) -> RefreshReport {
        let _serial = self.run_lock.lock().await;
        let run_id = Uuid::now_v7();
        let mut report = ReportBuilder::new(run_id, request.mode, &request.trigger, self.clock.now());
        tracing::info!(%run_id, mode = %request.mode, trigger = %request.trigger, "refresh started");

        if request.mode == RefreshMode::IfStale && self.resolve().await.is_fresh() {
            tracing::info!(%run_id, "statistics are fresh, refresh skipped");
            report.skipped_run("statistics are fresh");
            return report.finish(self.clock.now(), true);
        }

        // Collect
        self.enter(tx, run_id, RefreshStage::Collect);
        let from_collector = matches!(source, RunSource::Collector(_));
        let collected: ScopeResult<SnapshotBatch> = match source {
            RunSource::Collector(collector) => collector
                .collect_snapshot_batch()
                .await
                .map_err(ScopeError::from),
            RunSource::StoredBatch => self
                .call_layer(Layer::Persistent, "load_latest_snapshot_batch", || {
                    self.store.load_latest_snapshot_batch()
                })
                .await
                .map_err(ScopeError::from)
                .and_then(|batch| batch.ok_or(ScopeError::InsufficientData(InsufficientDataError))),
        };
        let batch = match collected.and_then(|batch| self.usable(batch)) {
            Ok(batch) => batch,
            Err(e) => return self.abort(report, run_id, RefreshStage::Collect, e).await,
        };
        report.batch(batch.batch_id, batch.len());
        self.complete(&mut report, run_id, RefreshStage::Collect, format!("{} records", batch.len()));

        // Persist snapshot
        if from_collector {
            self.enter(tx, run_id, RefreshStage::PersistSnapshot);
            match self
                .write_layer(Layer::Persistent, "save_snapshot_batch", || {
                    self.store.save_snapshot_batch(&batch)
                })
                .await
            {
                Ok(()) => self.complete(&mut report, run_id, RefreshStage::PersistSnapshot, batch.batch_id.to_string()),
                Err(e) => self.degrade(&mut report, run_id, RefreshStage::PersistSnapshot, e),
            }
        } else {
            report.stage(RefreshStage::PersistSnapshot, StageStatus::Skipped, Some("batch already stored".to_string()));
            self.publish(run_id, RefreshStage::PersistSnapshot, StageStatus::Skipped, None);
        }

        // Aggregate
        self.enter(tx, run_id, RefreshStage::Aggregate);
        let computed_at = self.clock.now();
        let BatchAggregation { table, skipped } = match self.aggregator.aggregate_batch(&batch, computed_at) {
            Ok(aggregation) => aggregation,
            Err(e) => return self.abort(report, run_id, RefreshStage::Aggregate, e.into()).await,
        };
        if !skipped.is_empty() {
            report.warn(format!("{} records skipped: sector label empty after normalization", skipped.len()));
        }
        let sector_count = table.sector_count();
        report.aggregated(sector_count, skipped);
        self.complete(&mut report, run_id, RefreshStage::Aggregate, format!("{} sectors", sector_count));

        // Persist statistics
        self.enter(tx, run_id, RefreshStage::PersistStatistics);
        let store_result = self
            .write_layer(Layer::Persistent, "save_sector_statistics", || {
                self.store.save_sector_statistics(&table, computed_at)
            })
            .await;
        let store_ok = store_result.is_ok();
        match &store_result {
            Ok(()) => self.complete(&mut report, run_id, RefreshStage::PersistStatistics, table.batch_id.to_string()),
            Err(e) => self.degrade(&mut report, run_id, RefreshStage::PersistStatistics, e.clone()),
        }

        // Persist archive
        self.enter(tx, run_id, RefreshStage::PersistArchive);
        let archive_ok = match self
            .write_layer(Layer::Archive, "save", || self.archive.save(&table, computed_at))
            .await
        {
            Ok(()) => {
                self.complete(&mut report, run_id, RefreshStage::PersistArchive, table.batch_id.to_string());
                true
            }
            Err(e) => {
                self.degrade(&mut report, run_id, RefreshStage::PersistArchive, e);
                false
            }
        };

        if let (Err(e), false) = (&store_result, archive_ok) {
            tracing::error!(%run_id, error = %e, "new statistics not stored in any layer");
            report.fail(RefreshStage::PersistStatistics, e.clone().into());
            let prior = self.resolve().await.state().has_data();
            return report.finish(self.clock.now(), prior);
        }

        let stored = Arc::new(StoredStatistics::new(table, computed_at));
        self.remember(CacheEntry::table(stored, Layer::Computed, self.clock.now(), self.config.entry_ttl));

        if store_ok {
            let keep = self.config.history_keep;
            if let Err(e) = self
                .write_layer(Layer::Persistent, "prune_history", || self.store.prune_history(keep))
                .await
            {
                tracing::warn!(%run_id, error = %e, "history pruning failed");
                report.warn(format!("history pruning failed: {}", e));
            }
        }

        let status = report.status();
        let finished = report.finish(self.clock.now(), true);
        tracing::info!(%run_id, %status, sectors = finished.sector_count, records = finished.record_count, "refresh finished");
        finished
    }

    /// A batch with no record that normalizes to a sector cannot produce a
    /// table. Rejected before it can replace the stored batch.
    fn usable(&self, batch: SnapshotBatch) -> ScopeResult<SnapshotBatch> {
        let normalizer = self.aggregator.normalizer();
        if batch
            .records
            .iter()
            .any(|record| normalizer.normalize(&record.sector_label).is_ok())
        {
            Ok(batch)
        } else {
            tracing::warn!(batch_id = %batch.batch_id, records = batch.len(), "collected batch has no usable records");
            Err(ScopeError::InsufficientData(InsufficientDataError))
        }
    }

    async fn abort(
        &self,
        mut report: ReportBuilder,
        run_id: Uuid,
        stage: RefreshStage,
        error: ScopeError,
    ) -> RefreshReport {
        tracing::error!(%run_id, %stage, error = %error, retryable = error.is_retryable(), "refresh failed");
        self.publish(run_id, stage, StageStatus::Failed, Some(error.to_string()));
        report.fail(stage, error);
        report.skip_remaining();
        let prior = self.resolve().await.state().has_data();
        report.finish(self.clock.now(), prior)
    }

    fn enter(&self, tx: &watch::Sender<RunState>, run_id: Uuid, stage: RefreshStage) {
        tx.send_replace(RunState::Running(stage));
        tracing::info!(%run_id, %stage, "refresh stage started");
        self.publish(run_id, stage, StageStatus::Started, None);
    }

    fn complete(&self, report: &mut ReportBuilder, run_id: Uuid, stage: RefreshStage, detail: String) {
        self.publish(run_id, stage, StageStatus::Completed, Some(detail.clone()));
        report.stage(stage, StageStatus::Completed, Some(detail));
    }

    fn degrade(&self, report: &mut ReportBuilder, run_id: Uuid, stage: RefreshStage, error: PersistenceError) {
        tracing::warn!(%run_id, %stage, error = %error, "layer write failed, continuing");
        self.publish(run_id, stage, StageStatus::Failed, Some(error.to_string()));
        report.degrade(stage, error.to_string());
    }

    fn publish(&self, run_id: Uuid, stage: RefreshStage, status: StageStatus, detail: Option<String>) {
        // No subscribers is fine.
        let _ = self.progress.send(RefreshProgress {
            run_id,
            stage,
            status,
            at: self.clock.now(),
            detail,
        });
    }

    // ------------------------------------------------------------------------
    // Health
    // ------------------------------------------------------------------------

    /// Check both durable layers and summarize.
    ///
    /// FRESH data is healthy, STALE data or a failing layer is degraded, and
    /// ABSENT is unhealthy.
    pub async fn health(&self) -> CacheHealth {
        let checks = vec![
            self.check_layer(Layer::Persistent, || self.store.load_sector_statistics())
                .await,
            self.check_layer(Layer::Archive, || self.archive.load()).await,
        ];

        let read = self.resolve().await;
        let mut status = match read.state() {
            FreshnessState::Fresh => HealthStatus::Healthy,
            FreshnessState::Stale => HealthStatus::Degraded,
            FreshnessState::Absent => HealthStatus::Unhealthy,
        };
        if checks.iter().any(|c| c.status == HealthStatus::Unhealthy) {
            status = status.worst(HealthStatus::Degraded);
        }

        CacheHealth {
            status,
            state: read.state(),
            layer: read.layer(),
            computed_at: read.computed_at(),
            age: read.age(),
            checks,
            last_refresh: self.last_refresh(),
        }
    }

    async fn check_layer<F, Fut>(&self, layer: Layer, call: F) -> HealthCheck
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<StoredStatistics>, PersistenceError>>,
    {
        let timeout = self.config.store_timeout;
        let started = Instant::now();
        let result = tokio::time::timeout(timeout, call()).await;
        let elapsed_ms = started.elapsed().as_millis() as i64;
        let component = layer.as_db_str();

        let check = match result {
            Ok(Ok(Some(stored))) => {
                let age = (self.clock.now() - stored.computed_at)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                let check = match classify(age, self.config.freshness_horizon) {
                    FreshnessState::Stale => HealthCheck::degraded(component, "stale"),
                    _ => HealthCheck::healthy(component),
                };
                check
                    .with_metadata("batch_id", serde_json::json!(stored.table.batch_id.to_string()))
                    .with_metadata("computed_at", serde_json::json!(stored.computed_at.to_rfc3339()))
                    .with_metadata("age_secs", serde_json::json!(age.as_secs()))
                    .with_metadata("sectors", serde_json::json!(stored.table.sector_count()))
            }
            Ok(Ok(None)) => HealthCheck::degraded(component, "empty"),
            Ok(Err(e)) => HealthCheck::unhealthy(component, e.to_string()),
            Err(_) => HealthCheck::unhealthy(component, format!("timed out after {:?}", timeout)),
        };
        check.with_response_time(elapsed_ms)
    }
}
