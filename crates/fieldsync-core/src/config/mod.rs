//! Engine configuration.
//!
//! Provides `SyncSettings`, the tunables shared by the outbox store and the
//! sync runtime. Clients embed it in their own config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sync::RetryPolicy;

const DEFAULT_BATCH_SIZE: usize = 50;
const DEFAULT_INTERVAL_SECS: u64 = 60;
const MAX_BATCH_SIZE: usize = 1_000;

/// Sync engine tunables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSettings {
    /// Failed attempts after which an operation is dead-lettered
    pub max_retries: u32,
    /// Delay after the first failure
    pub base_delay_ms: u64,
    /// Ceiling for the backoff delay
    pub max_delay_ms: u64,
    /// Growth factor between consecutive delays
    pub backoff_factor: f64,
    /// Operations pulled per drain cycle
    pub batch_size: usize,
    /// Scheduler tick when nothing is due sooner
    pub interval_secs: u64,
    /// Entity kinds counted as pending uploads
    pub upload_entities: Vec<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_retries: policy.max_retries,
            base_delay_ms: duration_ms(policy.base_delay),
            max_delay_ms: duration_ms(policy.max_delay),
            backoff_factor: policy.backoff_factor,
            batch_size: DEFAULT_BATCH_SIZE,
            interval_secs: DEFAULT_INTERVAL_SECS,
            upload_entities: vec!["media".to_string()],
        }
    }
}

impl SyncSettings {
    /// Parse settings from JSON, applying defaults for missing fields.
    pub fn from_json(payload: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(payload)
            .map_err(|error| Error::Config(format!("invalid sync settings JSON: {error}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values that would stall or hot-loop the runtime.
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(Error::Config("max_retries must be at least 1".into()));
        }
        if self.base_delay_ms == 0 {
            return Err(Error::Config("base_delay_ms must be positive".into()));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(Error::Config(
                "max_delay_ms must not be smaller than base_delay_ms".into(),
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(Error::Config("backoff_factor must be >= 1.0".into()));
        }
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(Error::Config(format!(
                "batch_size must be between 1 and {MAX_BATCH_SIZE}"
            )));
        }
        if self.interval_secs == 0 {
            return Err(Error::Config("interval_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_factor: self.backoff_factor,
        }
    }

    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Normalized upload entity kinds (trimmed, empties dropped)
    pub fn upload_entities(&self) -> Vec<String> {
        self.upload_entities
            .iter()
            .filter_map(|entity| crate::util::normalize_text_option(Some(entity.clone())))
            .collect()
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let settings = SyncSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.batch_size, 50);
        assert_eq!(settings.upload_entities, vec!["media".to_string()]);
    }

    #[test]
    fn from_json_fills_missing_fields() {
        let settings = SyncSettings::from_json(r#"{ "max_retries": 3 }"#).unwrap();
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.interval_secs, DEFAULT_INTERVAL_SECS);
    }

    #[test]
    fn from_json_rejects_unknown_fields() {
        let error = SyncSettings::from_json(r#"{ "max_retry": 3 }"#).unwrap_err();
        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn validate_rejects_inverted_delays() {
        let settings = SyncSettings {
            base_delay_ms: 10_000,
            max_delay_ms: 1_000,
            ..SyncSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_batch() {
        let settings = SyncSettings {
            batch_size: 0,
            ..SyncSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn retry_policy_mirrors_settings() {
        let settings = SyncSettings {
            max_retries: 7,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            backoff_factor: 3.0,
            ..SyncSettings::default()
        };
        let policy = settings.retry_policy();
        assert_eq!(policy.max_retries, 7);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Duration::from_millis(8_000));
    }

    #[test]
    fn upload_entities_are_normalized() {
        let settings = SyncSettings {
            upload_entities: vec![" media ".to_string(), "  ".to_string()],
            ..SyncSettings::default()
        };
        assert_eq!(settings.upload_entities(), vec!["media".to_string()]);
    }
}
