use std::path::Path;

use crate::commands::common::{format_status_lines, local_status, now_ms, open_store, print_json};
use crate::config_file::CliConfig;
use crate::error::CliError;

pub async fn run_status(as_json: bool, db_path: &Path, config: &CliConfig) -> Result<(), CliError> {
    let store = open_store(db_path, config).await?;
    let status = local_status(&store).await?;

    if as_json {
        return print_json(&status);
    }
    for line in format_status_lines(&status, now_ms()) {
        println!("{line}");
    }
    Ok(())
}
