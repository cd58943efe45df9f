//! Sync status snapshot shared with every observer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Externally visible phase of the sync runtime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    Idle,
    Syncing,
    Offline,
    Error,
}

impl SyncPhase {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Offline => "offline",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What caused a drain cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerReason {
    AppStart,
    AppResumed,
    Manual,
    Interval,
    NetworkResumed,
}

impl TriggerReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AppStart => "APP_START",
            Self::AppResumed => "APP_RESUMED",
            Self::Manual => "MANUAL",
            Self::Interval => "INTERVAL",
            Self::NetworkResumed => "NETWORK_RESUMED",
        }
    }
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerReason {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "APP_START" => Ok(Self::AppStart),
            "APP_RESUMED" => Ok(Self::AppResumed),
            "MANUAL" => Ok(Self::Manual),
            "INTERVAL" => Ok(Self::Interval),
            "NETWORK_RESUMED" => Ok(Self::NetworkResumed),
            other => Err(Error::InvalidInput(format!("unknown trigger reason: {other}"))),
        }
    }
}

/// Outcome counters of one drain cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleResult {
    /// Operations confirmed by the backend and removed
    pub pushed: u32,
    /// Operations rescheduled after a failed push
    pub failed: u32,
    /// Operations moved to the dead-letter state
    pub dead: u32,
    /// Conflicts recorded or refreshed during the cycle
    pub conflicts: u32,
}

impl CycleResult {
    pub const fn attempted(&self) -> u32 {
        self.pushed + self.failed + self.dead
    }
}

/// Health snapshot published by the runtime. Rebuilt, never persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    /// Pending, failed-awaiting-retry, and in-flight operations
    pub queue_depth: i64,
    pub dead_letter_count: i64,
    pub open_conflict_count: i64,
    /// Queue depth restricted to upload entity kinds
    pub pending_uploads: i64,
    /// End of the last fully successful drain (Unix ms)
    pub last_synced_at: Option<i64>,
    /// Most recent cycle-level error
    pub last_error: Option<String>,
    pub last_result: Option<CycleResult>,
    pub last_trigger: Option<TriggerReason>,
}

impl SyncStatus {
    /// True when nothing is waiting and nothing needs attention.
    pub const fn is_settled(&self) -> bool {
        self.queue_depth == 0
            && self.dead_letter_count == 0
            && self.open_conflict_count == 0
            && matches!(self.phase, SyncPhase::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_reason_parses_cli_spellings() {
        assert_eq!("manual".parse::<TriggerReason>().unwrap(), TriggerReason::Manual);
        assert_eq!(
            "network-resumed".parse::<TriggerReason>().unwrap(),
            TriggerReason::NetworkResumed
        );
        assert!("reboot".parse::<TriggerReason>().is_err());
    }

    #[test]
    fn trigger_reason_serializes_upper_snake() {
        let json = serde_json::to_string(&TriggerReason::AppStart).unwrap();
        assert_eq!(json, "\"APP_START\"");
    }

    #[test]
    fn default_status_is_settled() {
        assert!(SyncStatus::default().is_settled());
        let busy = SyncStatus {
            queue_depth: 1,
            ..SyncStatus::default()
        };
        assert!(!busy.is_settled());
    }
}
