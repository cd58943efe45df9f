//! fieldsync CLI - inspect and drive the offline outbox from a terminal
//!
//! Queue mutations, watch the sync runtime, replay dead letters, and
//! resolve conflicts without a UI.

mod cli;
mod commands;
mod config_file;
mod error;

#[cfg(test)]
mod tests;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, ConfigCommands, ConflictCommands};
use crate::commands::completions::run_completions;
use crate::commands::config::{run_config_init, run_config_show};
use crate::commands::conflicts::{run_conflicts_list, run_conflicts_resolve};
use crate::commands::enqueue::{run_enqueue, EnqueueArgs};
use crate::commands::queue::{run_queue, run_replay, QueueView};
use crate::commands::status::run_status;
use crate::commands::sync::{run_sync, run_watch};
use crate::commands::common::resolve_db_path;
use crate::config_file::CliConfig;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let as_json = cli.json;

    if let Commands::Completions { shell, output } = &cli.command {
        return run_completions(*shell, output.as_deref());
    }

    let config = CliConfig::load()?;
    let db_path = resolve_db_path(cli.db_path)?;

    match cli.command {
        Commands::Enqueue {
            entity,
            entity_id,
            payload,
            kind,
            base_version,
            org,
        } => {
            let args = EnqueueArgs {
                entity: &entity,
                entity_id: &entity_id,
                payload: payload.as_deref(),
                kind: kind.into(),
                base_version,
                org: org.as_deref(),
            };
            run_enqueue(&args, as_json, &db_path, &config).await?;
        }
        Commands::Status => run_status(as_json, &db_path, &config).await?,
        Commands::Pending { limit } => {
            run_queue(QueueView::Pending, limit, as_json, &db_path, &config).await?;
        }
        Commands::Failed { limit, min_retries } => {
            run_queue(
                QueueView::Failed { min_retries },
                limit,
                as_json,
                &db_path,
                &config,
            )
            .await?;
        }
        Commands::Dead { limit } => {
            run_queue(QueueView::Dead, limit, as_json, &db_path, &config).await?;
        }
        Commands::Replay => run_replay(&db_path, &config).await?,
        Commands::Sync { reason } => run_sync(reason, as_json, &db_path, &config).await?,
        Commands::Watch => run_watch(&db_path, &config).await?,
        Commands::Conflicts { command } => match command {
            ConflictCommands::List { all, limit } => {
                run_conflicts_list(all, limit, as_json, &db_path, &config).await?;
            }
            ConflictCommands::Resolve { id, keep, payload } => {
                run_conflicts_resolve(id, keep, payload.as_deref(), as_json, &db_path, &config)
                    .await?;
            }
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show => run_config_show(&config, as_json)?,
            ConfigCommands::Init {
                backend_url,
                org_id,
            } => run_config_init(&config, backend_url, org_id)?,
        },
        Commands::Completions { .. } => {}
    }

    Ok(())
}
