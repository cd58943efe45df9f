use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;
use fieldsync_core::models::{ConflictResolution, ConflictStatus};
use fieldsync_core::{
    NewOperation, Operation, OperationId, OperationKind, OperationStatus, Resolution,
    SyncConflict, SyncPhase, SyncStatus, SyncStore, TriggerReason,
};
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::cli::{Cli, CompletionShell, Commands, ResolutionArg};
use crate::commands::common::{
    format_conflict_lines, format_operation_lines, format_relative_time, format_status_line,
    format_status_lines, format_sync_timestamp, local_status, open_runtime, parse_payload,
};
use crate::commands::completions::run_completions;
use crate::commands::config::{effective_config, merge_config_init};
use crate::commands::conflicts::{build_resolution, run_conflicts_resolve};
use crate::commands::enqueue::{build_operation, run_enqueue, EnqueueArgs};
use crate::commands::queue::run_replay;
use crate::config_file::{CliConfig, BACKEND_URL_ENV};
use crate::error::CliError;

fn operation(status: OperationStatus, last_error: Option<&str>) -> Operation {
    Operation {
        id: "0190a8f2-5c3e-7d41-9b2a-123456789abc".parse::<OperationId>().unwrap(),
        seq: 1,
        org_id: None,
        entity: "inspection".to_string(),
        entity_id: "i-42".to_string(),
        kind: OperationKind::Update,
        payload: json!({}),
        base_version: Some(2),
        status,
        retry_count: 3,
        next_attempt_at: 0,
        last_error: last_error.map(str::to_string),
        created_at: 0,
        updated_at: 0,
    }
}

#[test]
fn format_sync_timestamp_returns_utc_label() {
    assert_eq!(format_sync_timestamp(0), "1970-01-01 00:00:00 UTC");
}

#[test]
fn format_relative_time_units() {
    let now = 10_000_000;
    assert_eq!(format_relative_time(now - 30_000, now), "just now");
    assert_eq!(format_relative_time(now - 120_000, now), "2m ago");
    assert_eq!(format_relative_time(now - 2 * 60 * 60_000, now), "2h ago");
    assert_eq!(format_relative_time(0, 3 * 24 * 60 * 60_000), "3d ago");
    assert_eq!(format_relative_time(now + 5_000, now), "just now");
}

#[test]
fn format_operation_lines_include_key_fields() {
    let lines = format_operation_lines(
        &[operation(OperationStatus::Failed, Some("HTTP 503"))],
        120_000,
    );
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("0190a8f2-5c3e"));
    assert!(lines[0].contains("update"));
    assert!(lines[0].contains("inspection/i-42"));
    assert!(lines[0].contains("failed"));
    assert!(lines[0].contains("retries=3"));
    assert!(lines[0].contains("2m ago"));
    assert!(lines[0].ends_with("HTTP 503"));
}

#[test]
fn format_conflict_lines_show_versions_and_state() {
    let conflict = SyncConflict {
        id: 7,
        operation_id: OperationId::new(),
        org_id: None,
        entity: "inspection".to_string(),
        entity_id: "i-42".to_string(),
        local_payload: json!({}),
        local_base_version: Some(2),
        remote_payload: None,
        remote_version: None,
        status: ConflictStatus::Resolved,
        resolution: Some(ConflictResolution::KeepRemote),
        detected_at: 0,
        resolved_at: Some(1),
    };

    let lines = format_conflict_lines(&[conflict]);
    assert!(lines[0].starts_with("#7"));
    assert!(lines[0].contains("1970-01-01 00:00:00 UTC"));
    assert!(lines[0].contains("keep_remote"));
    assert!(lines[0].contains("inspection/i-42"));
    assert!(lines[0].ends_with("base=2 remote=-"));
}

#[test]
fn format_status_lines_report_never_synced_and_errors() {
    let status = SyncStatus {
        phase: SyncPhase::Offline,
        queue_depth: 4,
        last_error: Some("Backend unreachable: no route".to_string()),
        ..SyncStatus::default()
    };
    let lines = format_status_lines(&status, 0);
    assert_eq!(lines[0], "phase:           offline");
    assert_eq!(lines[1], "queue depth:     4");
    assert!(lines.contains(&"last synced:     never".to_string()));
    assert_eq!(
        lines.last().map(String::as_str),
        Some("last error:      Backend unreachable: no route")
    );

    let line = format_status_line(&status);
    assert!(line.starts_with("offline  queue=4 dead=0 conflicts=0"));
    assert!(line.ends_with("error=\"Backend unreachable: no route\""));
}

#[test]
fn parse_payload_requires_json() {
    assert_eq!(parse_payload(r#"{"a": 1}"#).unwrap(), json!({ "a": 1 }));
    assert!(matches!(
        parse_payload("not json"),
        Err(CliError::InvalidPayload(_))
    ));
}

#[test]
fn merge_resolution_requires_payload() {
    assert_eq!(
        build_resolution(ResolutionArg::KeepLocal, None).unwrap(),
        Resolution::KeepLocal
    );
    assert!(matches!(
        build_resolution(ResolutionArg::Merge, None),
        Err(CliError::MissingMergePayload)
    ));
    assert_eq!(
        build_resolution(ResolutionArg::Merge, Some(r#"{"x": true}"#)).unwrap(),
        Resolution::Merge(json!({ "x": true }))
    );
}

#[test]
fn cli_parses_global_flags_and_trigger_reason() {
    let cli = Cli::try_parse_from(["fieldsync", "sync", "--reason", "network-resumed", "--json"])
        .unwrap();
    assert!(cli.json);
    assert!(matches!(
        cli.command,
        Commands::Sync {
            reason: TriggerReason::NetworkResumed
        }
    ));

    let cli = Cli::try_parse_from(["fieldsync", "--db-path", "/tmp/x.db", "status"]).unwrap();
    assert_eq!(cli.db_path, Some(PathBuf::from("/tmp/x.db")));
    assert!(Cli::try_parse_from(["fieldsync", "sync", "--reason", "reboot"]).is_err());
}

#[test]
fn build_operation_prefers_explicit_org() {
    let config = CliConfig {
        org_id: Some("org-config".to_string()),
        ..CliConfig::default()
    };
    let mut args = EnqueueArgs {
        entity: "inspection",
        entity_id: "i-1",
        payload: None,
        kind: OperationKind::Create,
        base_version: Some(4),
        org: None,
    };

    let draft = build_operation(&args, json!({}), &config);
    assert_eq!(draft.org_id.as_deref(), Some("org-config"));
    assert_eq!(draft.base_version, Some(4));
    assert_eq!(draft.kind, OperationKind::Create);

    args.org = Some("org-flag");
    let draft = build_operation(&args, json!({}), &config);
    assert_eq!(draft.org_id.as_deref(), Some("org-flag"));
}

#[test]
fn config_init_keeps_unset_fields() {
    let existing = CliConfig {
        backend_url: Some("https://sync.example.com".to_string()),
        org_id: Some("org-1".to_string()),
        ..CliConfig::default()
    };
    let merged = merge_config_init(&existing, None, Some(" org-2 ".to_string()));
    assert_eq!(merged.backend_url.as_deref(), Some("https://sync.example.com"));
    assert_eq!(merged.org_id.as_deref(), Some("org-2"));

    let effective = effective_config(&merged, Some("https://env.example.com".to_string()));
    assert_eq!(effective.backend_url.as_deref(), Some("https://env.example.com"));
}

#[cfg_attr(windows, ignore = "libsql integration is flaky on windows CI")]
#[tokio::test(flavor = "current_thread")]
async fn enqueue_and_replay_update_local_status() {
    let db_path = unique_test_db_path();
    let config = CliConfig::default();
    let args = EnqueueArgs {
        entity: "media",
        entity_id: "m-1",
        payload: Some(r#"{"file": "a.jpg"}"#),
        kind: OperationKind::Create,
        base_version: None,
        org: None,
    };
    run_enqueue(&args, false, &db_path, &config).await.unwrap();

    let store = SyncStore::open_path(&db_path, &config.sync).await.unwrap();
    let status = local_status(&store).await.unwrap();
    assert_eq!(status.queue_depth, 1);
    assert_eq!(status.pending_uploads, 1);
    assert_eq!(status.dead_letter_count, 0);

    let queued = store.get_pending_operations(10, i64::MAX).await.unwrap();
    assert_eq!(queued[0].payload, json!({ "file": "a.jpg" }));
    store.mark_in_flight(&queued[0].id).await.unwrap();
    store.mark_dead(&queued[0].id, "rejected").await.unwrap();
    assert_eq!(local_status(&store).await.unwrap().dead_letter_count, 1);
    drop(store);

    run_replay(&db_path, &config).await.unwrap();
    let store = SyncStore::open_path(&db_path, &config.sync).await.unwrap();
    let status = local_status(&store).await.unwrap();
    assert_eq!(status.dead_letter_count, 0);
    assert_eq!(status.queue_depth, 1);

    cleanup_db_files(&db_path);
}

#[cfg_attr(windows, ignore = "libsql integration is flaky on windows CI")]
#[tokio::test(flavor = "current_thread")]
async fn conflicts_resolve_keep_remote_drops_operation() {
    let db_path = unique_test_db_path();
    let config = CliConfig::default();
    let conflict_id = {
        let store = SyncStore::open_path(&db_path, &config.sync).await.unwrap();
        let operation = store
            .create(NewOperation::new(
                "inspection",
                "i-1",
                OperationKind::Update,
                json!({ "v": 1 }),
            ))
            .await
            .unwrap();
        store
            .record_conflict(&operation, None, Some(3))
            .await
            .unwrap()
            .id
    };

    run_conflicts_resolve(
        conflict_id,
        ResolutionArg::KeepRemote,
        None,
        false,
        &db_path,
        &config,
    )
    .await
    .unwrap();

    let store = SyncStore::open_path(&db_path, &config.sync).await.unwrap();
    let status = local_status(&store).await.unwrap();
    assert_eq!(status.open_conflict_count, 0);
    assert_eq!(status.queue_depth, 0);

    cleanup_db_files(&db_path);
}

#[cfg_attr(windows, ignore = "libsql integration is flaky on windows CI")]
#[tokio::test(flavor = "current_thread")]
async fn sync_requires_backend_configuration() {
    if std::env::var_os(BACKEND_URL_ENV).is_some() {
        return;
    }
    let db_path = unique_test_db_path();

    let error = open_runtime(&db_path, &CliConfig::default())
        .await
        .err()
        .unwrap();
    assert!(matches!(error, CliError::BackendNotConfigured));

    cleanup_db_files(&db_path);
}

#[test]
fn run_completions_writes_bash_script_file() {
    let output_path = std::env::temp_dir().join(format!(
        "fieldsync-completions-test-{}.bash",
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |duration| duration.as_nanos())
    ));

    run_completions(CompletionShell::Bash, Some(&output_path)).unwrap();

    let script = std::fs::read_to_string(&output_path).unwrap();
    assert!(script.contains("_fieldsync()"));
    assert!(script.contains("complete -F _fieldsync"));

    let _ = std::fs::remove_file(output_path);
}

fn unique_test_db_path() -> PathBuf {
    static NEXT_TEST_DB_ID: AtomicU64 = AtomicU64::new(0);

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    let sequence = NEXT_TEST_DB_ID.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("fieldsync-cli-test-{timestamp}-{sequence}.db"))
}

fn cleanup_db_files(path: &PathBuf) {
    // On Windows, libsql can keep file handles alive briefly after drop.
    if cfg!(windows) {
        return;
    }

    let _ = std::fs::remove_file(path);
    let _ = std::fs::remove_file(path.with_extension("db-shm"));
    let _ = std::fs::remove_file(path.with_extension("db-wal"));
}
