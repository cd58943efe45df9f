use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use fieldsync_core::{OperationKind, TriggerReason};

#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(about = "Inspect and drive the fieldsync offline outbox")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the local outbox database
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Output as JSON where supported
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Record a mutation in the outbox
    Enqueue {
        /// Entity kind (e.g. inspection, media)
        entity: String,
        /// Identifier of the mutated row
        entity_id: String,
        /// JSON payload (read from stdin when omitted)
        payload: Option<String>,
        /// Mutation kind
        #[arg(long, value_enum, default_value_t = KindArg::Update)]
        kind: KindArg,
        /// Remote version the mutation is based on
        #[arg(long, value_name = "VERSION")]
        base_version: Option<i64>,
        /// Organisation override (defaults to the configured org)
        #[arg(long, value_name = "ORG")]
        org: Option<String>,
    },
    /// Show queue depth, dead letters, and open conflicts
    Status,
    /// List operations waiting to be pushed
    Pending {
        /// Number of operations to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// List operations that failed at least once
    Failed {
        /// Number of operations to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Minimum number of failed attempts
        #[arg(long, default_value = "1")]
        min_retries: i64,
    },
    /// List dead-lettered operations
    Dead {
        /// Number of operations to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Move every dead operation back into the queue
    Replay,
    /// Push queued operations to the backend now
    Sync {
        /// Trigger reason recorded in the status
        #[arg(long, default_value = "manual", value_parser = parse_trigger_reason)]
        reason: TriggerReason,
    },
    /// Run the scheduler and print status changes until interrupted
    Watch,
    /// Inspect and resolve version conflicts
    Conflicts {
        #[command(subcommand)]
        command: ConflictCommands,
    },
    /// Show or initialize CLI configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum KindArg {
    Create,
    Update,
    Delete,
}

impl From<KindArg> for OperationKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Create => Self::Create,
            KindArg::Update => Self::Update,
            KindArg::Delete => Self::Delete,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ResolutionArg {
    /// Re-push the local mutation on top of the remote version
    KeepLocal,
    /// Drop the local mutation
    KeepRemote,
    /// Re-push a merged payload (requires --payload)
    Merge,
}

#[derive(Subcommand)]
pub enum ConflictCommands {
    /// List recorded conflicts, newest first
    List {
        /// Include resolved conflicts
        #[arg(long)]
        all: bool,
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Resolve an open conflict
    Resolve {
        /// Conflict ID
        id: i64,
        /// Resolution to apply
        #[arg(long, value_enum)]
        keep: ResolutionArg,
        /// Merged JSON payload for `--keep merge`
        #[arg(long, value_name = "JSON")]
        payload: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Create or update the configuration file
    Init {
        /// Backend base URL (e.g. <https://sync.example.com>)
        #[arg(long, value_name = "URL")]
        backend_url: Option<String>,
        /// Default organisation for new operations
        #[arg(long, value_name = "ORG")]
        org_id: Option<String>,
    },
}

fn parse_trigger_reason(value: &str) -> Result<TriggerReason, String> {
    value.parse().map_err(|error: fieldsync_core::Error| error.to_string())
}
