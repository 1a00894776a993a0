use std::env;
use std::path::{Path, PathBuf};

use chrono::Utc;
use fieldsync_core::audit::TracingAuditSink;
use fieldsync_core::config::EngineConfig;
use fieldsync_core::connectivity::Connectivity;
use fieldsync_core::gateway::ConfiguredGateway;
use fieldsync_core::models::{FailedMutation, Mutation, MutationIntent, SyncConflict};
use fieldsync_core::services::{LocalStore, SyncEngine};
use fieldsync_core::{EntityId, TempId};
use serde::Serialize;

use crate::error::CliError;

pub type AppEngine = SyncEngine<ConfiguredGateway, TracingAuditSink>;

/// Global options shared by every command
#[derive(Debug, Clone)]
pub struct Context {
    pub db_path: PathBuf,
    pub config_path: PathBuf,
    pub offline: bool,
}

impl Context {
    pub fn resolve(db_path: Option<PathBuf>, config_path: Option<PathBuf>, offline: bool) -> Self {
        Self {
            db_path: resolve_db_path(db_path),
            config_path: resolve_config_path(config_path),
            offline,
        }
    }
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("FIELDSYNC_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fieldsync")
        .join("fieldsync.db")
}

pub fn resolve_config_path(cli_config_path: Option<PathBuf>) -> PathBuf {
    cli_config_path
        .or_else(|| env::var_os("FIELDSYNC_CONFIG").map(PathBuf::from))
        .unwrap_or_else(default_config_path)
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fieldsync")
        .join("config.json")
}

pub fn load_config(path: &Path) -> Result<EngineConfig, CliError> {
    EngineConfig::load_from(path)?
        .with_env_overrides()
        .map_err(CliError::from)
}

pub async fn open_engine(context: &Context) -> Result<AppEngine, CliError> {
    let config = load_config(&context.config_path)?;
    let gateway = ConfiguredGateway::from_config(&config)?;
    let online = gateway.is_connected() && !context.offline;
    if !gateway.is_connected() {
        tracing::debug!("Running in local-only mode (no api_base_url)");
    }

    let store = LocalStore::open_path(&context.db_path).await?;
    Ok(SyncEngine::new(
        store,
        gateway,
        TracingAuditSink,
        Connectivity::new(online),
        &config,
    ))
}

/// Parse a user-typed id: the printable temporary form or a server id.
pub fn parse_entity_id(input: &str) -> Result<EntityId, CliError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(CliError::EmptyId);
    }
    Ok(trimmed
        .parse::<TempId>()
        .map_or_else(|_| EntityId::permanent(trimmed), EntityId::from))
}

/// Parse an id and follow it to the server id if it has been synced since.
pub async fn resolve_entity_id(engine: &AppEngine, input: &str) -> Result<EntityId, CliError> {
    let id = parse_entity_id(input)?;
    if let EntityId::Temporary(temp) = &id {
        if let Some(permanent) = engine.store().lookup_mapping(temp).await? {
            return Ok(EntityId::permanent(permanent));
        }
    }
    Ok(id)
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

/// Single-line cell text, truncated with an ellipsis
pub fn truncate(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let mut truncated = collapsed
            .chars()
            .take(max_chars.saturating_sub(3))
            .collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

fn describe_intent(intent: &MutationIntent) -> String {
    format!(
        "{:<6}  {:<8}  {}",
        intent.operation().as_str(),
        intent.entity_type().as_str(),
        intent.entity_id()
    )
}

pub fn format_mutation_lines(mutations: &[Mutation]) -> Vec<String> {
    let now = now_ms();
    mutations
        .iter()
        .map(|mutation| {
            let retries = if mutation.retry_count == 0 {
                String::new()
            } else {
                format!("  retries={}", mutation.retry_count)
            };
            format!(
                "#{:<5} {}  {}{retries}",
                mutation.id.0,
                describe_intent(&mutation.intent),
                format_relative_time(mutation.timestamp, now)
            )
        })
        .collect()
}

pub fn format_failed_lines(failed: &[FailedMutation]) -> Vec<String> {
    failed
        .iter()
        .map(|entry| {
            format!(
                "{}  {:<17}  {}  {}",
                format_timestamp(entry.failed_at),
                entry.reason.as_str(),
                describe_intent(&entry.mutation.intent),
                truncate(&entry.error, 60)
            )
        })
        .collect()
}

pub fn format_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    let stamp = |value: Option<i64>| value.map_or_else(|| "-".to_string(), |at| at.to_string());
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {:<16}  {}={} unit={}  local={} incoming={}",
                format_timestamp(conflict.resolved_at),
                conflict.resolution,
                conflict.entity_type,
                conflict.entity_id,
                conflict.unit_key,
                stamp(conflict.local_modified_at),
                stamp(conflict.incoming_modified_at)
            )
        })
        .collect()
}
