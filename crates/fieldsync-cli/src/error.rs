use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] fieldsync_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No payload provided")]
    EmptyPayload,
    #[error("Payload is not valid JSON: {0}")]
    InvalidPayload(String),
    #[error("`--keep merge` requires --payload")]
    MissingMergePayload,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "Backend is not configured. Run `fieldsync config init --backend-url <URL>` or set FIELDSYNC_BACKEND_URL."
    )]
    BackendNotConfigured,
}
