use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use fieldsync_core::{
    HttpBackend, Operation, SyncConflict, SyncPhase, SyncRuntime, SyncStatus, SyncStore,
};
use serde::Serialize;

use crate::config_file::{CliConfig, BACKEND_URL_ENV, DB_PATH_ENV, TOKEN_ENV};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct OperationItem {
    pub id: String,
    pub entity: String,
    pub entity_id: String,
    pub kind: String,
    pub status: String,
    pub retry_count: i64,
    pub next_attempt_at: i64,
    pub next_attempt_iso: String,
    pub last_error: Option<String>,
    pub created_at: i64,
}

pub fn operation_to_item(operation: &Operation) -> OperationItem {
    OperationItem {
        id: operation.id.to_string(),
        entity: operation.entity.clone(),
        entity_id: operation.entity_id.clone(),
        kind: operation.kind.to_string(),
        status: operation.status.to_string(),
        retry_count: operation.retry_count,
        next_attempt_at: operation.next_attempt_at,
        next_attempt_iso: format_sync_timestamp(operation.next_attempt_at),
        last_error: operation.last_error.clone(),
        created_at: operation.created_at,
    }
}

pub fn format_operation_lines(operations: &[Operation], now_ms: i64) -> Vec<String> {
    operations
        .iter()
        .map(|operation| {
            let id = operation.id.to_string();
            let short_id = id.get(..13).unwrap_or(&id);
            let target = format!("{}/{}", operation.entity, operation.entity_id);
            let base = format!(
                "{short_id:<13}  {:<6}  {target:<28}  {:<9}  retries={}  {}",
                operation.kind.as_str(),
                operation.status.as_str(),
                operation.retry_count,
                format_relative_time(operation.created_at, now_ms)
            );
            match operation.last_error.as_deref() {
                Some(error) => format!("{base}  {error}"),
                None => base,
            }
        })
        .collect()
}

pub fn format_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            let versions = format!(
                "base={} remote={}",
                format_version(conflict.local_base_version),
                format_version(conflict.remote_version)
            );
            let state = conflict
                .resolution
                .map_or_else(|| "open".to_string(), |resolution| resolution.to_string());
            format!(
                "#{:<5}  {}  {:<11}  {}/{}  {versions}",
                conflict.id,
                format_sync_timestamp(conflict.detected_at),
                state,
                conflict.entity,
                conflict.entity_id
            )
        })
        .collect()
}

fn format_version(version: Option<i64>) -> String {
    version.map_or_else(|| "-".to_string(), |version| version.to_string())
}

pub fn format_status_lines(status: &SyncStatus, now_ms: i64) -> Vec<String> {
    let last_synced = status.last_synced_at.map_or_else(
        || "never".to_string(),
        |at| format!("{} ({})", format_sync_timestamp(at), format_relative_time(at, now_ms)),
    );
    let mut lines = vec![
        format!("phase:           {}", status.phase),
        format!("queue depth:     {}", status.queue_depth),
        format!("pending uploads: {}", status.pending_uploads),
        format!("dead letters:    {}", status.dead_letter_count),
        format!("open conflicts:  {}", status.open_conflict_count),
        format!("last synced:     {last_synced}"),
    ];
    if let Some(error) = &status.last_error {
        lines.push(format!("last error:      {error}"));
    }
    lines
}

pub fn format_status_line(status: &SyncStatus) -> String {
    let mut line = format!(
        "{:<8} queue={} dead={} conflicts={}",
        status.phase.as_str(),
        status.queue_depth,
        status.dead_letter_count,
        status.open_conflict_count
    );
    if let Some(result) = status.last_result.filter(|_| status.phase != SyncPhase::Syncing) {
        line.push_str(&format!(
            " pushed={} failed={}",
            result.pushed,
            result.failed + result.dead
        ));
    }
    if let Some(error) = &status.last_error {
        line.push_str(&format!(" error=\"{error}\""));
    }
    line
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
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

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else {
        format!("{}d ago", diff / day)
    }
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Parse a JSON payload argument, falling back to piped stdin.
pub fn resolve_payload(argument: Option<&str>) -> Result<serde_json::Value, CliError> {
    let raw = match argument.and_then(normalize_content) {
        Some(raw) => raw,
        None => read_piped_stdin()?.ok_or(CliError::EmptyPayload)?,
    };
    parse_payload(&raw)
}

pub fn parse_payload(raw: &str) -> Result<serde_json::Value, CliError> {
    serde_json::from_str(raw).map_err(|error| CliError::InvalidPayload(error.to_string()))
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    match cli_db_path.or_else(|| env::var_os(DB_PATH_ENV).map(PathBuf::from)) {
        Some(path) => Ok(path),
        None => default_db_path(),
    }
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("fieldsync").join("outbox.db"))
        .ok_or_else(|| CliError::Config("cannot resolve the user data directory".to_string()))
}

pub async fn open_store(path: &Path, config: &CliConfig) -> Result<SyncStore, CliError> {
    Ok(SyncStore::open_path(path, &config.sync).await?)
}

/// Store plus runtime wired to the configured HTTP backend.
pub async fn open_runtime(path: &Path, config: &CliConfig) -> Result<SyncRuntime, CliError> {
    let backend_url = config
        .resolve_backend_url(env::var(BACKEND_URL_ENV).ok())
        .ok_or(CliError::BackendNotConfigured)?;
    let backend = HttpBackend::new(backend_url, env::var(TOKEN_ENV).ok())?;
    tracing::debug!("Using backend {}", backend.base_url());

    let store = open_store(path, config).await?;
    Ok(SyncRuntime::new(store, Arc::new(backend), &config.sync)?)
}

/// Status computed from the store alone, for commands that never push.
pub async fn local_status(store: &SyncStore) -> Result<SyncStatus, CliError> {
    Ok(SyncStatus {
        queue_depth: store.count_pending_operations().await?,
        dead_letter_count: store.count_dead_operations().await?,
        open_conflict_count: store.open_conflict_count(None).await?,
        pending_uploads: store.count_pending_uploads().await?,
        ..SyncStatus::default()
    })
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
