use std::path::Path;

use fieldsync_core::Operation;

use crate::commands::common::{
    format_operation_lines, now_ms, open_store, operation_to_item, print_json, OperationItem,
};
use crate::config_file::CliConfig;
use crate::error::CliError;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum QueueView {
    Pending,
    Failed { min_retries: i64 },
    Dead,
}

impl QueueView {
    const fn empty_message(self) -> &'static str {
        match self {
            Self::Pending => "No operations due.",
            Self::Failed { .. } => "No failed operations.",
            Self::Dead => "No dead operations.",
        }
    }
}

pub async fn run_queue(
    view: QueueView,
    limit: usize,
    as_json: bool,
    db_path: &Path,
    config: &CliConfig,
) -> Result<(), CliError> {
    let store = open_store(db_path, config).await?;
    let operations = match view {
        QueueView::Pending => store.get_pending_operations(limit, now_ms()).await?,
        QueueView::Failed { min_retries } => {
            store.get_failed_operations(limit, min_retries).await?
        }
        QueueView::Dead => store.get_dead_operations(limit).await?,
    };
    print_operations(&operations, view, as_json)
}

fn print_operations(
    operations: &[Operation],
    view: QueueView,
    as_json: bool,
) -> Result<(), CliError> {
    if as_json {
        let items = operations
            .iter()
            .map(operation_to_item)
            .collect::<Vec<OperationItem>>();
        return print_json(&items);
    }

    if operations.is_empty() {
        println!("{}", view.empty_message());
        return Ok(());
    }
    for line in format_operation_lines(operations, now_ms()) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_replay(db_path: &Path, config: &CliConfig) -> Result<(), CliError> {
    let store = open_store(db_path, config).await?;
    let revived = store.retry_all_dead_operations().await?;
    if revived == 0 {
        println!("No dead operations to replay.");
    } else {
        println!("Requeued {revived} dead operations");
    }
    Ok(())
}
