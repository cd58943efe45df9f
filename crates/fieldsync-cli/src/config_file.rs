//! Persistent CLI configuration.

use std::path::{Path, PathBuf};

use fieldsync_core::util::{is_http_url, normalize_text_option};
use fieldsync_core::SyncSettings;
use serde::{Deserialize, Serialize};

use crate::error::CliError;

const CONFIG_FILE_NAME: &str = "config.json";
pub const BACKEND_URL_ENV: &str = "FIELDSYNC_BACKEND_URL";
pub const TOKEN_ENV: &str = "FIELDSYNC_TOKEN";
pub const DB_PATH_ENV: &str = "FIELDSYNC_DB_PATH";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CliConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,
    #[serde(default)]
    pub backend_url: Option<String>,
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default)]
    pub sync: SyncSettings,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            version: default_config_version(),
            backend_url: None,
            org_id: None,
            sync: SyncSettings::default(),
        }
    }
}

const fn default_config_version() -> u32 {
    1
}

pub fn default_config_path() -> Result<PathBuf, CliError> {
    dirs::config_dir()
        .map(|dir| dir.join("fieldsync").join(CONFIG_FILE_NAME))
        .ok_or_else(|| CliError::Config("cannot resolve the user config directory".to_string()))
}

impl CliConfig {
    pub fn load() -> Result<Self, CliError> {
        Self::load_from_path(&default_config_path()?)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, CliError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|error| {
            CliError::Config(format!("Failed to read config at {}: {error}", path.display()))
        })?;
        let mut config = serde_json::from_str::<Self>(&raw).map_err(|error| {
            CliError::Config(format!("Failed to parse config at {}: {error}", path.display()))
        })?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf, CliError> {
        let path = default_config_path()?;
        self.save_to_path(&path)?;
        Ok(path)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), CliError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut normalized = self.clone();
        normalized.normalize();
        normalized.validate()?;
        let serialized = serde_json::to_string_pretty(&normalized)?;
        std::fs::write(path, serialized)?;
        Ok(())
    }

    /// Backend URL, preferring the environment override.
    pub fn resolve_backend_url(&self, env_value: Option<String>) -> Option<String> {
        normalize_text_option(env_value).or_else(|| self.backend_url.clone())
    }

    pub fn validate(&self) -> Result<(), CliError> {
        if let Some(url) = &self.backend_url {
            if !is_http_url(url) {
                return Err(CliError::Config(
                    "backend_url must include http:// or https://".to_string(),
                ));
            }
        }
        self.sync.validate()?;
        Ok(())
    }

    fn normalize(&mut self) {
        self.backend_url = normalize_text_option(self.backend_url.take())
            .map(|url| url.trim_end_matches('/').to_string());
        self.org_id = normalize_text_option(self.org_id.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CliConfig::load_from_path(&dir.path().join("none.json")).unwrap();
        assert_eq!(config, CliConfig::default());
    }

    #[test]
    fn config_roundtrip_normalizes_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);

        let config = CliConfig {
            backend_url: Some(" https://sync.example.com/ ".to_string()),
            org_id: Some("  ".to_string()),
            ..CliConfig::default()
        };
        config.save_to_path(&path).unwrap();

        let loaded = CliConfig::load_from_path(&path).unwrap();
        assert_eq!(loaded.backend_url.as_deref(), Some("https://sync.example.com"));
        assert_eq!(loaded.org_id, None);
        assert_eq!(loaded.sync, SyncSettings::default());
    }

    #[test]
    fn partial_sync_block_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, r#"{ "org_id": "org-9", "sync": { "max_retries": 8 } }"#).unwrap();

        let loaded = CliConfig::load_from_path(&path).unwrap();
        assert_eq!(loaded.org_id.as_deref(), Some("org-9"));
        assert_eq!(loaded.sync.max_retries, 8);
        assert_eq!(loaded.sync.batch_size, SyncSettings::default().batch_size);
    }

    #[test]
    fn invalid_backend_url_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = CliConfig {
            backend_url: Some("sync.example.com".to_string()),
            ..CliConfig::default()
        };
        let error = config
            .save_to_path(&dir.path().join(CONFIG_FILE_NAME))
            .unwrap_err();
        assert!(matches!(error, CliError::Config(_)));
    }

    #[test]
    fn environment_overrides_backend_url() {
        let config = CliConfig {
            backend_url: Some("https://file.example.com".to_string()),
            ..CliConfig::default()
        };
        assert_eq!(
            config
                .resolve_backend_url(Some(" https://env.example.com ".to_string()))
                .as_deref(),
            Some("https://env.example.com")
        );
        assert_eq!(
            config.resolve_backend_url(Some(String::new())).as_deref(),
            Some("https://file.example.com")
        );
        assert_eq!(CliConfig::default().resolve_backend_url(None), None);
    }
}
