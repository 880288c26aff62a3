//! Refresh run reports and progress events.

use std::fmt;

use sectorscope_aggregate::SkippedRecord;
use sectorscope_core::{BatchId, RefreshStage, RefreshStatus, ScopeError, Timestamp};
use uuid::Uuid;

/// How a refresh trigger treats existing data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefreshMode {
    /// Skip the run when the current resolution is FRESH.
    IfStale,
    /// Always collect and recompute.
    Force,
}

impl RefreshMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshMode::IfStale => "if_stale",
            RefreshMode::Force => "force",
        }
    }
}

impl fmt::Display for RefreshMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A refresh trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRequest {
    pub mode: RefreshMode,
    /// Who asked, for logs (e.g. "cli", "scheduler").
    pub trigger: String,
}

impl RefreshRequest {
    pub fn new(mode: RefreshMode, trigger: impl Into<String>) -> Self {
        Self {
            mode,
            trigger: trigger.into(),
        }
    }

    pub fn force(trigger: impl Into<String>) -> Self {
        Self::new(RefreshMode::Force, trigger)
    }

    pub fn if_stale(trigger: impl Into<String>) -> Self {
        Self::new(RefreshMode::IfStale, trigger)
    }
}

/// State of one stage within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageStatus {
    Started,
    Completed,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Started => "started",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event published on the progress channel as a run moves through stages.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshProgress {
    pub run_id: Uuid,
    pub stage: RefreshStage,
    pub status: StageStatus,
    pub at: Timestamp,
    pub detail: Option<String>,
}

/// Final state of one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome {
    pub stage: RefreshStage,
    pub status: StageStatus,
    pub detail: Option<String>,
}

/// Terminal summary of a refresh run, shared by every trigger that joined it.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshReport {
    pub run_id: Uuid,
    pub mode: RefreshMode,
    pub trigger: String,
    pub status: RefreshStatus,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    pub stages: Vec<StageOutcome>,
    /// First stage that failed outright, if any.
    pub failed_stage: Option<RefreshStage>,
    pub error: Option<ScopeError>,
    /// Whether triggering again later can be expected to help.
    pub retryable: bool,
    /// Whether a previously stored table is still being served.
    pub prior_data_usable: bool,
    pub warnings: Vec<String>,
    pub batch_id: Option<BatchId>,
    pub record_count: usize,
    pub sector_count: usize,
    pub skipped_records: Vec<SkippedRecord>,
}

impl RefreshReport {
    pub fn is_failure(&self) -> bool {
        self.status.is_failure()
    }

    pub fn stage(&self, stage: RefreshStage) -> Option<&StageOutcome> {
        self.stages.iter().find(|s| s.stage == stage)
    }
}

/// Accumulates a report while a run executes.
#[derive(Debug)]
pub(crate) struct ReportBuilder {
    report: RefreshReport,
}

impl ReportBuilder {
    pub(crate) fn new(run_id: Uuid, mode: RefreshMode, trigger: &str, started_at: Timestamp) -> Self {
        Self {
            report: RefreshReport {
                run_id,
                mode,
                trigger: trigger.to_string(),
                status: RefreshStatus::Success,
                started_at,
                finished_at: started_at,
                stages: Vec::new(),
                failed_stage: None,
                error: None,
                retryable: false,
                prior_data_usable: false,
                warnings: Vec::new(),
                batch_id: None,
                record_count: 0,
                sector_count: 0,
                skipped_records: Vec::new(),
            },
        }
    }

    pub(crate) fn stage(&mut self, stage: RefreshStage, status: StageStatus, detail: Option<String>) {
        self.report.stages.push(StageOutcome {
            stage,
            status,
            detail,
        });
    }

    /// A layer write failed but the run carries on.
    pub(crate) fn degrade(&mut self, stage: RefreshStage, warning: String) {
        self.stage(stage, StageStatus::Failed, Some(warning.clone()));
        self.report.warnings.push(warning);
        if self.report.status == RefreshStatus::Success {
            self.report.status = RefreshStatus::PartialSuccess;
        }
        self.report.retryable = true;
    }

    pub(crate) fn warn(&mut self, warning: String) {
        self.report.warnings.push(warning);
    }

    /// The run stops here.
    pub(crate) fn fail(&mut self, stage: RefreshStage, error: ScopeError) {
        if self.report.stage(stage).is_none() {
            self.stage(stage, StageStatus::Failed, Some(error.to_string()));
        }
        self.report.retryable = error.is_retryable();
        self.report.status = RefreshStatus::Failed;
        self.report.failed_stage = Some(stage);
        self.report.error = Some(error);
    }

    pub(crate) fn skip_remaining(&mut self) {
        for stage in RefreshStage::ALL {
            if self.report.stage(stage).is_none() {
                self.stage(stage, StageStatus::Skipped, None);
            }
        }
    }

    pub(crate) fn skipped_run(&mut self, reason: &str) {
        self.report.status = RefreshStatus::Skipped;
        self.report.prior_data_usable = true;
        self.report.warnings.push(reason.to_string());
        self.skip_remaining();
    }

    pub(crate) fn batch(&mut self, batch_id: BatchId, record_count: usize) {
        self.report.batch_id = Some(batch_id);
        self.report.record_count = record_count;
    }

    pub(crate) fn aggregated(&mut self, sector_count: usize, skipped: Vec<SkippedRecord>) {
        self.report.sector_count = sector_count;
        self.report.skipped_records = skipped;
    }

    pub(crate) fn status(&self) -> RefreshStatus {
        self.report.status
    }

    pub(crate) fn finish(mut self, finished_at: Timestamp, prior_data_usable: bool) -> RefreshReport {
        self.report.finished_at = finished_at;
        if self.report.status != RefreshStatus::Skipped {
            self.report.prior_data_usable = prior_data_usable;
        }
        self.report.stages.sort_by_key(|s| s.stage);
        self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sectorscope_core::{CollectionError, InsufficientDataError, PersistenceError, Layer};

    fn builder() -> ReportBuilder {
        ReportBuilder::new(Uuid::now_v7(), RefreshMode::Force, "test", Utc::now())
    }

    #[test]
    fn test_degrade_marks_partial_success() {
        let mut b = builder();
        b.stage(RefreshStage::Collect, StageStatus::Completed, None);
        b.degrade(
            RefreshStage::PersistArchive,
            PersistenceError::failed(Layer::Archive, "save", "disk full").to_string(),
        );
        let report = b.finish(Utc::now(), true);
        assert_eq!(report.status, RefreshStatus::PartialSuccess);
        assert!(report.failed_stage.is_none());
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(
            report.stage(RefreshStage::PersistArchive).unwrap().status,
            StageStatus::Failed
        );
    }

    #[test]
    fn test_fail_keeps_retryable_classification() {
        let mut b = builder();
        b.fail(
            RefreshStage::Collect,
            ScopeError::Collection(CollectionError::RateLimited {
                provider: "krx".to_string(),
                retry_after_ms: 1000,
            }),
        );
        b.skip_remaining();
        let report = b.finish(Utc::now(), true);
        assert!(report.is_failure());
        assert!(report.retryable);
        assert!(report.prior_data_usable);
        assert_eq!(report.failed_stage, Some(RefreshStage::Collect));
        assert_eq!(report.stages.len(), RefreshStage::ALL.len());
        assert_eq!(report.stages[0].stage, RefreshStage::Collect);

        let mut b = builder();
        b.fail(RefreshStage::Aggregate, InsufficientDataError.into());
        assert!(!b.finish(Utc::now(), false).retryable);
    }

    #[test]
    fn test_skipped_run() {
        let mut b = builder();
        b.skipped_run("statistics are fresh");
        let report = b.finish(Utc::now(), false);
        assert_eq!(report.status, RefreshStatus::Skipped);
        assert!(report.prior_data_usable);
        assert!(report
            .stages
            .iter()
            .all(|s| s.status == StageStatus::Skipped));
    }
}
