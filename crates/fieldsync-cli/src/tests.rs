use std::path::PathBuf;

use clap::Parser;
use fieldsync_core::db::RecordFilter;
use fieldsync_core::models::{Customer, JobStatus, TimesheetEntry, Worker};
use fieldsync_core::outbox::{DrainReport, SkipReason};
use fieldsync_core::reconcile::{RefreshReport, SyncReport};
use fieldsync_core::services::Entity;
use fieldsync_core::state::{SyncState, SyncStatus};
use fieldsync_core::{EntityId, EntityType, TempId};
use pretty_assertions::assert_eq;

use crate::cli::{Cli, Commands, CompletionShell, QueueCommands, WorkerCommands};
use crate::commands::common::{
    format_relative_time, open_engine, parse_entity_id, resolve_db_path, truncate, Context,
};
use crate::commands::completions::render_completions;
use crate::commands::job::parse_job_status;
use crate::commands::sync::{format_status, format_sync_report};
use crate::commands::worker::format_timesheet;
use crate::error::CliError;

fn local_context(dir: &tempfile::TempDir) -> Context {
    Context {
        db_path: dir.path().join("fieldsync.db"),
        config_path: dir.path().join("missing-config.json"),
        offline: true,
    }
}

#[test]
fn parse_entity_id_recognizes_temporary_form() {
    let temp = TempId::from_parts(EntityType::Customer, 1_700_000_000, "abc123");
    let parsed = parse_entity_id(&format!("  {temp} ")).unwrap();
    assert_eq!(parsed, EntityId::from(temp));
}

#[test]
fn parse_entity_id_treats_other_input_as_server_id() {
    assert_eq!(
        parse_entity_id("cust_42").unwrap(),
        EntityId::permanent("cust_42")
    );
    assert!(matches!(parse_entity_id("   "), Err(CliError::EmptyId)));
}

#[test]
fn explicit_db_path_wins() {
    let path = PathBuf::from("/tmp/custom.db");
    assert_eq!(resolve_db_path(Some(path.clone())), path);
}

#[test]
fn format_relative_time_units() {
    let now = 10_000_000_000;
    assert_eq!(format_relative_time(now - 30_000, now), "just now");
    assert_eq!(format_relative_time(now - 120_000, now), "2m ago");
    assert_eq!(format_relative_time(now - 2 * 60 * 60_000, now), "2h ago");
    assert_eq!(format_relative_time(now - 3 * 24 * 60 * 60_000, now), "3d ago");
}

#[test]
fn truncate_collapses_whitespace_and_adds_ellipsis() {
    assert_eq!(truncate("  two\n words ", 20), "two words");
    assert_eq!(truncate("abcdefghij", 6), "abc...");
}

#[test]
fn job_status_accepts_dashed_input() {
    assert_eq!(parse_job_status("in-progress").unwrap(), JobStatus::InProgress);
    assert!(matches!(
        parse_job_status("paused"),
        Err(CliError::InvalidArgument(_))
    ));
}

#[test]
fn offline_sync_report_mentions_queue() {
    let report = SyncReport {
        drain: DrainReport::skipped(SkipReason::Offline),
        refresh: None,
    };
    assert_eq!(
        format_sync_report(&report, 3),
        vec!["Offline; 3 change(s) remain queued".to_string()]
    );
}

#[test]
fn sync_report_summarizes_drain_and_refresh() {
    let report = SyncReport {
        drain: DrainReport {
            applied: 2,
            ..DrainReport::default()
        },
        refresh: Some(RefreshReport {
            inserted: 1,
            ..RefreshReport::default()
        }),
    };
    let lines = format_sync_report(&report, 0);
    assert_eq!(lines[0], "Pushed 2 change(s), 0 waiting, 0 to retry, 0 failed");
    assert_eq!(
        lines[1],
        "Refreshed: 1 new, 0 updated, 0 merged, 0 kept local, 0 removed"
    );
}

#[test]
fn status_flags_degraded_storage() {
    let status = SyncStatus {
        queue_size: 2,
        draining: false,
        online: false,
        state: SyncState::Offline,
        failed_count: 0,
        last_synced_at: None,
        storage_degraded: true,
    };
    let lines = format_status(&status, 0);
    assert_eq!(lines[0], "State:        offline");
    assert_eq!(lines[1], "Queued:       2");
    assert!(lines.last().unwrap().starts_with("Warning"));
}

#[test]
fn timesheet_lists_days_and_total() {
    let mut worker = Worker::new("Ana");
    worker.set_entry("mon", TimesheetEntry::hours(8.0), 1);
    worker.set_entry("tue", TimesheetEntry::hours(4.5), 2);
    let entity = Entity {
        id: EntityId::permanent("wrk_1"),
        updated_at: 0,
        fields: worker,
    };

    let lines = format_timesheet(&entity);
    assert_eq!(lines[0], "wrk_1  Ana");
    assert_eq!(lines[1], "  mon            8.0h");
    assert_eq!(lines.last().unwrap(), "  total         12.5h");
}

#[test]
fn cli_parses_global_flags_after_subcommand() {
    let cli = Cli::try_parse_from([
        "fieldsync",
        "worker",
        "hours",
        "wrk_1",
        "mon",
        "7.5",
        "--offline",
        "--db-path",
        "/tmp/x.db",
    ])
    .unwrap();

    assert!(cli.offline);
    assert_eq!(cli.db_path, Some(PathBuf::from("/tmp/x.db")));
    assert!(matches!(
        cli.command,
        Commands::Worker {
            command: WorkerCommands::Hours { hours, .. }
        } if (hours - 7.5).abs() < f64::EPSILON
    ));
}

#[test]
fn cli_parses_queue_clear_failed() {
    let cli = Cli::try_parse_from(["fieldsync", "queue", "clear", "--failed"]).unwrap();
    assert!(matches!(
        cli.command,
        Commands::Queue {
            command: QueueCommands::Clear { failed: true }
        }
    ));
}

#[test]
fn completions_name_the_binary() {
    let script = String::from_utf8(render_completions(CompletionShell::Bash)).unwrap();
    assert!(script.contains("fieldsync"));
}

#[tokio::test(flavor = "multi_thread")]
async fn local_only_engine_queues_writes() {
    let dir = tempfile::tempdir().unwrap();
    let context = local_context(&dir);

    let engine = open_engine(&context).await.unwrap();
    let created = engine
        .customers()
        .create(Customer::new("Acme"))
        .await
        .unwrap();
    assert!(created.id.is_temporary());

    let report = engine.request_sync(None).await.unwrap();
    assert_eq!(report.drain.skipped, Some(SkipReason::Offline));
    assert_eq!(engine.queue_depth().await.unwrap(), 1);

    let listed = engine
        .customers()
        .list(&RecordFilter::default())
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn queued_writes_survive_reopening_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let context = local_context(&dir);

    {
        let engine = open_engine(&context).await.unwrap();
        engine
            .workers()
            .create(Worker::new("Ana"))
            .await
            .unwrap();
    }

    let engine = open_engine(&context).await.unwrap();
    assert_eq!(engine.queue_depth().await.unwrap(), 1);
    assert_eq!(engine.sync_status().await.unwrap().state, SyncState::Offline);
}
