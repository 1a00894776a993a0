use fieldsync_core::outbox::SkipReason;
use fieldsync_core::reconcile::SyncReport;
use fieldsync_core::state::{SyncState, SyncStatus};

use crate::commands::common::{
    format_conflict_lines, format_relative_time, now_ms, open_engine, print_json, Context,
};
use crate::error::CliError;

pub async fn run_sync(context: &Context) -> Result<(), CliError> {
    let engine = open_engine(context).await?;
    if !engine.controller().gateway().is_connected() {
        return Err(CliError::SyncNotConfigured);
    }

    let report = engine.request_sync(None).await?;
    let queued = engine.queue_depth().await?;
    for line in format_sync_report(&report, queued) {
        println!("{line}");
    }
    Ok(())
}

pub fn format_sync_report(report: &SyncReport, queued: usize) -> Vec<String> {
    let drain = &report.drain;
    match drain.skipped {
        Some(SkipReason::Offline) => {
            return vec![format!("Offline; {queued} change(s) remain queued")];
        }
        Some(SkipReason::AlreadyDraining) => {
            return vec!["A sync is already in progress".to_string()];
        }
        None => {}
    }

    let mut lines = vec![format!(
        "Pushed {} change(s), {} waiting, {} to retry, {} failed",
        drain.applied,
        drain.deferred,
        drain.retried,
        drain.failed.len()
    )];
    if drain.interrupted {
        lines.push(format!("Connection lost; {queued} change(s) remain queued"));
    }
    if let Some(refresh) = &report.refresh {
        lines.push(format!(
            "Refreshed: {} new, {} updated, {} merged, {} kept local, {} removed",
            refresh.inserted, refresh.updated, refresh.merged, refresh.kept_pending, refresh.pruned
        ));
    }
    for failed in &drain.failed {
        lines.push(format!(
            "  failed {} {} ({}): {}",
            failed.mutation.operation().as_str(),
            failed.mutation.intent.entity_id(),
            failed.reason.as_str(),
            failed.error
        ));
    }
    lines
}

pub async fn run_sync_conflicts(
    limit: usize,
    as_json: bool,
    context: &Context,
) -> Result<(), CliError> {
    let engine = open_engine(context).await?;
    let conflicts = engine.conflicts(limit).await?;

    if as_json {
        return print_json(&conflicts);
    }
    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }
    for line in format_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_status(as_json: bool, context: &Context) -> Result<(), CliError> {
    let engine = open_engine(context).await?;
    let status = engine.sync_status().await?;

    if as_json {
        return print_json(&status);
    }
    for line in format_status(&status, now_ms()) {
        println!("{line}");
    }
    Ok(())
}

pub fn format_status(status: &SyncStatus, now_ms: i64) -> Vec<String> {
    let state = match status.state {
        SyncState::Offline => "offline",
        SyncState::Syncing => "syncing",
        SyncState::Synced => "synced",
        SyncState::Error => "sync failed",
    };
    let last_synced = status.last_synced_at.map_or_else(
        || "never (this session)".to_string(),
        |at| format_relative_time(at, now_ms),
    );

    let mut lines = vec![
        format!("State:        {state}"),
        format!("Queued:       {}", status.queue_size),
        format!("Failed:       {}", status.failed_count),
        format!("Last synced:  {last_synced}"),
    ];
    if status.storage_degraded {
        lines.push("Warning: local storage reported errors; recent writes may be lost".to_string());
    }
    lines
}
