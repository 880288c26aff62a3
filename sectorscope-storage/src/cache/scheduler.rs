//! Scheduled collection.
//!
//! A background task that triggers an `IfStale` refresh on a fixed cadence.
//! The cadence is independent of the freshness horizon: a tick while the
//! table is still FRESH is a cheap no-op run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sectorscope_core::{CoordinatorConfig, RefreshStatus};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::coordinator::CacheCoordinator;
use super::report::RefreshRequest;
use crate::SnapshotCollector;

/// Trigger name used in refresh reports and logs.
pub const SCHEDULER_TRIGGER: &str = "scheduler";

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the scheduled refresh task.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledRefreshConfig {
    /// How often to trigger a refresh (default: daily)
    pub interval: Duration,

    /// Trigger immediately on start instead of waiting one interval
    /// (default: true)
    pub run_on_start: bool,
}

impl Default for ScheduledRefreshConfig {
    fn default() -> Self {
        Self::from(&CoordinatorConfig::default())
    }
}

impl From<&CoordinatorConfig> for ScheduledRefreshConfig {
    fn from(config: &CoordinatorConfig) -> Self {
        Self {
            interval: config.collection_interval,
            run_on_start: true,
        }
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters for the scheduled task's lifetime.
#[derive(Debug, Default)]
pub struct ScheduledRefreshMetrics {
    pub ticks: AtomicU64,
    pub runs_succeeded: AtomicU64,
    pub runs_partial: AtomicU64,
    pub runs_skipped: AtomicU64,
    pub runs_failed: AtomicU64,
}

impl ScheduledRefreshMetrics {
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.runs_failed.load(Ordering::Relaxed)
    }

    fn record(&self, status: RefreshStatus) {
        let counter = match status {
            RefreshStatus::Success => &self.runs_succeeded,
            RefreshStatus::PartialSuccess => &self.runs_partial,
            RefreshStatus::Skipped => &self.runs_skipped,
            RefreshStatus::Failed => &self.runs_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Spawn the scheduled refresh task.
///
/// Runs until `shutdown` flips to `true` or its sender is dropped. A tick
/// that lands while the previous run is still going joins that run instead
/// of starting another.
pub fn spawn_scheduled_refresh(
    coordinator: Arc<CacheCoordinator>,
    collector: Arc<dyn SnapshotCollector>,
    config: ScheduledRefreshConfig,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<Arc<ScheduledRefreshMetrics>> {
    tokio::spawn(async move {
        let metrics = Arc::new(ScheduledRefreshMetrics::default());

        let mut ticker = interval(config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        if !config.run_on_start {
            // The first tick of an interval completes immediately.
            ticker.tick().await;
        }

        tracing::info!(
            interval_secs = config.interval.as_secs(),
            provider = collector.provider(),
            "scheduled refresh started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("scheduled refresh shutting down");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    metrics.ticks.fetch_add(1, Ordering::Relaxed);
                    match coordinator
                        .generate(Arc::clone(&collector), RefreshRequest::if_stale(SCHEDULER_TRIGGER))
                        .await
                    {
                        Ok(report) => {
                            metrics.record(report.status);
                            tracing::debug!(run_id = %report.run_id, status = %report.status, "scheduled refresh tick");
                        }
                        Err(e) => {
                            metrics.record(RefreshStatus::Failed);
                            tracing::error!(error = %e, "scheduled refresh did not complete");
                        }
                    }
                }
            }
        }

        tracing::info!(
            ticks = metrics.ticks(),
            succeeded = metrics.runs_succeeded.load(Ordering::Relaxed),
            skipped = metrics.runs_skipped.load(Ordering::Relaxed),
            failed = metrics.failures(),
            "scheduled refresh stopped"
        );
        metrics
    })
}
