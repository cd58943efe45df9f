use std::path::Path;

use fieldsync_core::models::ConflictStatus;
use fieldsync_core::sync::ConflictResolver;
use fieldsync_core::Resolution;

use crate::cli::ResolutionArg;
use crate::commands::common::{format_conflict_lines, open_store, parse_payload, print_json};
use crate::config_file::CliConfig;
use crate::error::CliError;

pub async fn run_conflicts_list(
    include_resolved: bool,
    limit: usize,
    as_json: bool,
    db_path: &Path,
    config: &CliConfig,
) -> Result<(), CliError> {
    let store = open_store(db_path, config).await?;
    let status = (!include_resolved).then_some(ConflictStatus::Open);
    let conflicts = store.list_conflicts(status, None, limit).await?;

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

pub fn build_resolution(keep: ResolutionArg, payload: Option<&str>) -> Result<Resolution, CliError> {
    match keep {
        ResolutionArg::KeepLocal => Ok(Resolution::KeepLocal),
        ResolutionArg::KeepRemote => Ok(Resolution::KeepRemote),
        ResolutionArg::Merge => {
            let raw = payload.ok_or(CliError::MissingMergePayload)?;
            Ok(Resolution::Merge(parse_payload(raw)?))
        }
    }
}

pub async fn run_conflicts_resolve(
    id: i64,
    keep: ResolutionArg,
    payload: Option<&str>,
    as_json: bool,
    db_path: &Path,
    config: &CliConfig,
) -> Result<(), CliError> {
    let resolution = build_resolution(keep, payload)?;
    let store = open_store(db_path, config).await?;
    let conflict = ConflictResolver::new(store).resolve(id, resolution).await?;

    if as_json {
        return print_json(&conflict);
    }
    println!(
        "Resolved conflict #{} on {}/{}",
        conflict.id, conflict.entity, conflict.entity_id
    );
    Ok(())
}
