use std::path::Path;

use fieldsync_core::{SyncPhase, TriggerOutcome, TriggerReason};

use crate::commands::common::{
    format_status_line, format_status_lines, now_ms, open_runtime, print_json,
};
use crate::config_file::CliConfig;
use crate::error::CliError;

pub async fn run_sync(
    reason: TriggerReason,
    as_json: bool,
    db_path: &Path,
    config: &CliConfig,
) -> Result<(), CliError> {
    let runtime = open_runtime(db_path, config).await?;
    runtime.refresh_queue_depth().await?;

    let outcome = runtime.trigger(reason).await?;
    let status = runtime.status();
    if as_json {
        return print_json(&status);
    }

    match outcome {
        TriggerOutcome::Ran(result) => println!(
            "Sync finished: pushed={} failed={} dead={} conflicts={}",
            result.pushed, result.failed, result.dead, result.conflicts
        ),
        TriggerOutcome::Skipped(reason) => println!("Sync skipped: {reason:?}"),
    }
    for line in format_status_lines(&status, now_ms()) {
        println!("{line}");
    }
    if status.phase == SyncPhase::Error {
        eprintln!("{}", format_status_line(&status));
    }
    Ok(())
}

/// Keep the scheduler running and print every status change until Ctrl-C.
pub async fn run_watch(db_path: &Path, config: &CliConfig) -> Result<(), CliError> {
    let runtime = open_runtime(db_path, config).await?;
    let initial = runtime.refresh_queue_depth().await?;
    println!("{}", format_status_line(&initial));

    let printer = runtime
        .hub()
        .subscribe_with(|status| println!("{}", format_status_line(&status)));
    let handle = runtime.start();

    tokio::signal::ctrl_c().await?;
    drop(handle);
    printer.unsubscribe();
    runtime.teardown().await;
    Ok(())
}
