use std::env;

use fieldsync_core::util::normalize_text_option;

use crate::commands::common::print_json;
use crate::config_file::{default_config_path, CliConfig, BACKEND_URL_ENV, TOKEN_ENV};
use crate::error::CliError;

pub fn run_config_show(config: &CliConfig, as_json: bool) -> Result<(), CliError> {
    let effective = effective_config(config, env::var(BACKEND_URL_ENV).ok());
    if as_json {
        return print_json(&effective);
    }

    println!("config file: {}", default_config_path()?.display());
    println!(
        "backend_url: {}",
        effective.backend_url.as_deref().unwrap_or("(not set)")
    );
    println!("org_id:      {}", effective.org_id.as_deref().unwrap_or("(not set)"));
    println!(
        "token:       {}",
        if env::var(TOKEN_ENV).is_ok() {
            "[REDACTED]"
        } else {
            "(not set)"
        }
    );
    println!("sync:        {}", serde_json::to_string(&effective.sync)?);
    Ok(())
}

/// File config with environment overrides applied.
pub fn effective_config(config: &CliConfig, backend_url_env: Option<String>) -> CliConfig {
    CliConfig {
        backend_url: config.resolve_backend_url(backend_url_env),
        ..config.clone()
    }
}

/// Merge explicit flags into an existing config; unset flags keep current values.
pub fn merge_config_init(
    existing: &CliConfig,
    backend_url: Option<String>,
    org_id: Option<String>,
) -> CliConfig {
    CliConfig {
        backend_url: normalize_text_option(backend_url).or_else(|| existing.backend_url.clone()),
        org_id: normalize_text_option(org_id).or_else(|| existing.org_id.clone()),
        ..existing.clone()
    }
}

pub fn run_config_init(
    existing: &CliConfig,
    backend_url: Option<String>,
    org_id: Option<String>,
) -> Result<(), CliError> {
    let config = merge_config_init(existing, backend_url, org_id);
    let path = config.save().map_err(|error| match error {
        CliError::Config(message) => CliError::Config(message),
        other => CliError::Config(format!("Failed to save config: {other}")),
    })?;
    println!("Saved config to {}", path.display());
    Ok(())
}
