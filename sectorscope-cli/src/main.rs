//! SECTORSCOPE command-line interface.
//!
//! Triggers refreshes against a snapshot file and queries the cache. All
//! configuration comes from `SECTORSCOPE_*` environment variables.

mod args;
mod render;
mod telemetry;

use std::future::Future;
use std::process::ExitCode;
use std::sync::Arc;

use clap::error::ErrorKind;
use clap::Parser;
use sectorscope_aggregate::SectorStatisticsAggregator;
use sectorscope_core::{
    AggregationConfig, CoordinatorConfig, FreshnessState, PersistenceError, ScopeResult,
    StorageConfig,
};
use sectorscope_storage::{
    spawn_scheduled_refresh, CacheCoordinator, FileArchive, JsonFileCollector,
    LmdbPersistentStore, RefreshReport, RefreshRequest, ScheduledRefreshConfig,
};
use tokio::sync::watch;

use crate::args::{Cli, Command};
use crate::telemetry::{init_tracing, LogFormat};

#[tokio::main]
async fn main() -> ScopeResult<ExitCode> {
    init_tracing(LogFormat::from_env())?;

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return Ok(usage_exit(e.kind()));
        }
    };

    let coordinator = Arc::new(build_coordinator()?);
    run(cli.command, coordinator).await
}

fn build_coordinator() -> ScopeResult<CacheCoordinator> {
    let storage = StorageConfig::from_env();
    let aggregation = AggregationConfig::from_env()?;
    let config = CoordinatorConfig::from_env();

    let store = LmdbPersistentStore::from_config(&storage).map_err(PersistenceError::from)?;
    let archive = FileArchive::new(storage.archive_path());
    let aggregator = SectorStatisticsAggregator::new(&aggregation)?;

    tracing::debug!(
        data_dir = %storage.data_dir.display(),
        freshness_horizon_secs = config.freshness_horizon.as_secs(),
        "opening cache"
    );
    CacheCoordinator::new(Arc::new(store), Arc::new(archive), aggregator, config)
}

async fn run(command: Command, coordinator: Arc<CacheCoordinator>) -> ScopeResult<ExitCode> {
    match command {
        Command::Refresh { input, if_stale } => {
            let collector = Arc::new(JsonFileCollector::new(input));
            let request = if if_stale {
                RefreshRequest::if_stale("cli")
            } else {
                RefreshRequest::force("cli")
            };
            let report =
                with_progress(&coordinator, coordinator.generate(collector, request)).await?;
            Ok(report_exit(&report))
        }
        Command::Regenerate => {
            let report =
                with_progress(&coordinator, coordinator.regenerate_from_stored_batch()).await?;
            Ok(report_exit(&report))
        }
        Command::Schedule { input } => {
            let collector = Arc::new(JsonFileCollector::new(input));
            let config = ScheduledRefreshConfig::from(coordinator.config());
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let handle = spawn_scheduled_refresh(coordinator, collector, config, shutdown_rx);

            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
            match handle.await {
                Ok(metrics) if metrics.failures() == 0 => Ok(ExitCode::SUCCESS),
                Ok(_) => Ok(ExitCode::FAILURE),
                Err(e) => {
                    tracing::error!(error = %e, "scheduled refresh task panicked");
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::Show { sector } => {
            let label = Command::sector_label(&sector);
            let read = coordinator.get_sector_statistics(&label).await?;
            print!("{}", render::sector(&read));
            Ok(state_exit(read.state))
        }
        Command::List => {
            let read = coordinator.get_all_sector_statistics().await;
            print!("{}", render::table(&read));
            Ok(state_exit(read.state()))
        }
        Command::Status => {
            let health = coordinator.health().await;
            print!("{}", render::health(&health));
            Ok(state_exit(health.state))
        }
        Command::History { limit } => {
            let limit = usize::try_from(limit).unwrap_or(usize::MAX);
            let entries = coordinator.statistics_history(limit).await?;
            print!("{}", render::history(&entries));
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Drive a refresh while printing one line per stage event.
async fn with_progress<F>(coordinator: &CacheCoordinator, refresh: F) -> ScopeResult<Arc<RefreshReport>>
where
    F: Future<Output = ScopeResult<Arc<RefreshReport>>>,
{
    let mut progress = coordinator.subscribe_progress();
    tokio::pin!(refresh);
    loop {
        tokio::select! {
            result = &mut refresh => {
                while let Ok(event) = progress.try_recv() {
                    println!("{}", render::progress_line(&event));
                }
                return result;
            }
            Ok(event) = progress.recv() => {
                println!("{}", render::progress_line(&event));
            }
        }
    }
}

/// Help and version requests succeed; every other parse error is a usage
/// error.
fn usage_exit(kind: ErrorKind) -> ExitCode {
    match kind {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
        _ => ExitCode::from(2),
    }
}

fn report_exit(report: &RefreshReport) -> ExitCode {
    print!("{}", render::report(report));
    if report.is_failure() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn state_exit(state: FreshnessState) -> ExitCode {
    if state.has_data() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
