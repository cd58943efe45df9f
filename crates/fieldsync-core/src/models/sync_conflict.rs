//! Sync conflict model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

use super::operation::OperationId;

/// Resolution state of a recorded conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Open,
    Resolved,
}

impl ConflictStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Resolved => "resolved",
        }
    }
}

impl FromStr for ConflictStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "open" => Ok(Self::Open),
            "resolved" => Ok(Self::Resolved),
            other => Err(Error::Database(format!("unknown conflict status: {other}"))),
        }
    }
}

/// How a human settled a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    KeepLocal,
    KeepRemote,
    Merge,
}

impl ConflictResolution {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::KeepLocal => "keep_local",
            Self::KeepRemote => "keep_remote",
            Self::Merge => "merge",
        }
    }
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictResolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "keep_local" => Ok(Self::KeepLocal),
            "keep_remote" => Ok(Self::KeepRemote),
            "merge" => Ok(Self::Merge),
            other => Err(Error::InvalidInput(format!(
                "unknown conflict resolution: {other}"
            ))),
        }
    }
}

/// Push rejected because the remote row diverged from the assumed base version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    /// Operation whose push was rejected
    pub operation_id: OperationId,
    pub org_id: Option<String>,
    pub entity: String,
    pub entity_id: String,
    /// Payload the client tried to push
    pub local_payload: serde_json::Value,
    /// Version the client assumed
    pub local_base_version: Option<i64>,
    /// Remote row at detection time, when the backend returned it
    pub remote_payload: Option<serde_json::Value>,
    pub remote_version: Option<i64>,
    pub status: ConflictStatus,
    pub resolution: Option<ConflictResolution>,
    /// Detection timestamp (unix ms)
    pub detected_at: i64,
    /// Resolution timestamp (unix ms)
    pub resolved_at: Option<i64>,
}

impl SyncConflict {
    pub const fn is_open(&self) -> bool {
        matches!(self.status, ConflictStatus::Open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_round_trips_through_storage_text() {
        for resolution in [
            ConflictResolution::KeepLocal,
            ConflictResolution::KeepRemote,
            ConflictResolution::Merge,
        ] {
            assert_eq!(
                resolution.as_str().parse::<ConflictResolution>().unwrap(),
                resolution
            );
        }
        assert!("lww".parse::<ConflictResolution>().is_err());
    }
}
