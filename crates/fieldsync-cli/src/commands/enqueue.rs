use std::path::Path;

use fieldsync_core::{NewOperation, OperationKind};

use crate::commands::common::{open_store, operation_to_item, print_json, resolve_payload};
use crate::config_file::CliConfig;
use crate::error::CliError;

pub struct EnqueueArgs<'a> {
    pub entity: &'a str,
    pub entity_id: &'a str,
    pub payload: Option<&'a str>,
    pub kind: OperationKind,
    pub base_version: Option<i64>,
    pub org: Option<&'a str>,
}

pub fn build_operation(
    args: &EnqueueArgs<'_>,
    payload: serde_json::Value,
    config: &CliConfig,
) -> NewOperation {
    let mut draft = NewOperation::new(args.entity, args.entity_id, args.kind, payload);
    if let Some(org) = args.org.map(str::to_string).or_else(|| config.org_id.clone()) {
        draft = draft.with_org(org);
    }
    if let Some(version) = args.base_version {
        draft = draft.with_base_version(version);
    }
    draft
}

pub async fn run_enqueue(
    args: &EnqueueArgs<'_>,
    as_json: bool,
    db_path: &Path,
    config: &CliConfig,
) -> Result<(), CliError> {
    let payload = resolve_payload(args.payload)?;
    let store = open_store(db_path, config).await?;
    let operation = store.create(build_operation(args, payload, config)).await?;

    if as_json {
        print_json(&operation_to_item(&operation))?;
    } else {
        println!("{}", operation.id);
    }
    Ok(())
}
