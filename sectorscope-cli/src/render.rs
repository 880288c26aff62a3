//! Plain-text rendering of reads, reports and health.

use std::fmt::Write;

use sectorscope_core::{
    FreshnessState, Layer, SectorStatistics, StatisticsTable, Timestamp, ValuationField,
};
use sectorscope_storage::{
    CacheHealth, HistoryEntry, RefreshProgress, RefreshReport, SectorLookup, SectorRead,
    StatisticsRead,
};

pub fn progress_line(event: &RefreshProgress) -> String {
    match &event.detail {
        Some(detail) => format!(
            "[{}] {:<18} {} ({})",
            event.at.format("%H:%M:%S"),
            event.stage.as_db_str(),
            event.status,
            detail
        ),
        None => format!(
            "[{}] {:<18} {}",
            event.at.format("%H:%M:%S"),
            event.stage.as_db_str(),
            event.status
        ),
    }
}

pub fn report(report: &RefreshReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "run {} ({}, trigger {})", report.run_id, report.mode, report.trigger);
    for stage in &report.stages {
        match &stage.detail {
            Some(detail) => {
                let _ = writeln!(
                    out,
                    "  {:<18} {:<9} {}",
                    stage.stage.as_db_str(),
                    stage.status.as_str(),
                    detail
                );
            }
            None => {
                let _ = writeln!(out, "  {:<18} {}", stage.stage.as_db_str(), stage.status);
            }
        }
    }
    let _ = writeln!(out, "status: {}", report.status);
    if let Some(batch_id) = report.batch_id {
        let _ = writeln!(
            out,
            "batch {}: {} records, {} sectors, {} skipped",
            batch_id,
            report.record_count,
            report.sector_count,
            report.skipped_records.len()
        );
    }
    for warning in &report.warnings {
        let _ = writeln!(out, "warning: {}", warning);
    }
    if let Some(error) = &report.error {
        let _ = writeln!(out, "error: {}", error);
        let _ = writeln!(
            out,
            "retryable: {}, prior data usable: {}",
            report.retryable, report.prior_data_usable
        );
    }
    out
}

fn freshness_header(
    out: &mut String,
    state: FreshnessState,
    layer: Option<Layer>,
    computed_at: Option<Timestamp>,
) {
    let _ = write!(out, "{}", state);
    if let Some(layer) = layer {
        let _ = write!(out, " from {}", layer);
    }
    if let Some(at) = computed_at {
        let _ = write!(out, ", computed {}", at.to_rfc3339());
    }
    out.push('\n');
}

fn sector_body(out: &mut String, stats: &SectorStatistics) {
    let _ = writeln!(out, "  sample size {}", stats.sample_size);
    for (field, percentiles) in &stats.percentiles {
        let points: Vec<String> = percentiles
            .breakpoints
            .iter()
            .map(|b| format!("p{:.0}={:.2}", b.p * 100.0, b.value))
            .collect();
        let _ = writeln!(
            out,
            "  {:<10} n={:<4} {}",
            field.as_str(),
            percentiles.present_count,
            points.join(" ")
        );
    }
}

pub fn sector(read: &SectorRead) -> String {
    let mut out = String::new();
    freshness_header(
        &mut out,
        read.state,
        read.layer,
        read.computed_at,
    );
    if let Some(warning) = &read.warning {
        let _ = writeln!(out, "warning: {}", warning);
    }
    let _ = writeln!(out, "{}", read.sector);
    match &read.lookup {
        SectorLookup::Available(stats) => sector_body(&mut out, stats),
        SectorLookup::Unavailable => out.push_str("  unavailable for this sector\n"),
        SectorLookup::UnknownSector => out.push_str("  not in the current table\n"),
        SectorLookup::NoData => out.push_str("  no statistics in any layer\n"),
    }
    out
}

pub fn table(read: &StatisticsRead) -> String {
    let mut out = String::new();
    freshness_header(
        &mut out,
        read.state(),
        read.layer(),
        read.computed_at(),
    );
    if let Some(warning) = read.warning() {
        let _ = writeln!(out, "warning: {}", warning);
    }
    for failure in read.layer_failures() {
        let _ = writeln!(out, "layer failure: {}", failure);
    }
    if let Some(table) = read.table() {
        table_rows(&mut out, table);
    }
    out
}

fn table_rows(out: &mut String, table: &StatisticsTable) {
    let _ = writeln!(out, "batch {} ({} sectors)", table.batch_id, table.sector_count());
    for stats in table.sectors.values() {
        let median = stats
            .field(ValuationField::PER)
            .and_then(|p| p.median())
            .map(|m| format!("{:.2}", m))
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "  {:<16} n={:<5} PER median {}",
            stats.sector.as_str(),
            stats.sample_size,
            median
        );
    }
}

pub fn health(health: &CacheHealth) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "overall: {} ({})", health.status, health.state);
    if let (Some(layer), Some(age)) = (health.layer, health.age) {
        let _ = writeln!(out, "serving from {} ({}s old)", layer, age.as_secs());
    }
    for check in &health.checks {
        let _ = write!(out, "  {:<12} {}", check.component, check.status);
        if let Some(message) = &check.message {
            let _ = write!(out, " - {}", message);
        }
        if let Some(ms) = check.response_time_ms {
            let _ = write!(out, " [{}ms]", ms);
        }
        out.push('\n');
    }
    if let Some(last) = &health.last_refresh {
        let _ = writeln!(out, "last refresh: {} at {}", last.status, last.finished_at.to_rfc3339());
    }
    out
}

pub fn history(entries: &[HistoryEntry]) -> String {
    if entries.is_empty() {
        return "no stored tables\n".to_string();
    }
    let mut out = String::new();
    for entry in entries {
        let _ = writeln!(
            out,
            "#{:<5} {} batch {} sectors={} samples={}",
            entry.sequence,
            entry.computed_at.to_rfc3339(),
            entry.batch_id,
            entry.sector_count,
            entry.total_samples
        );
    }
    out
}
