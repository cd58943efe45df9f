//! Outbox operation model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A unique identifier for an outbox operation, using UUID v7 (time-sortable).
///
/// Generated on the client when the mutation is recorded and kept for every
/// retry, so the backend can use it as an idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Create a new unique operation ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Kind of mutation carried by an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!(
                "unknown operation kind: {other}"
            ))),
        }
    }
}

/// Outbox lifecycle status
///
/// `Failed` rows are still waiting to be pushed: they become eligible again
/// once `next_attempt_at` has elapsed. `Dead` rows are only revived by an
/// explicit replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    InFlight,
    Failed,
    Dead,
}

impl OperationStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Failed => "failed",
            Self::Dead => "dead",
        }
    }

    /// Whether the row still counts toward the queue depth
    pub const fn is_unconfirmed(self) -> bool {
        !matches!(self, Self::Dead)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_flight" => Ok(Self::InFlight),
            "failed" => Ok(Self::Failed),
            "dead" => Ok(Self::Dead),
            other => Err(Error::Database(format!(
                "unknown operation status: {other}"
            ))),
        }
    }
}

/// A pending or historical mutation recorded in the outbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Unique identifier, stable across retries
    pub id: OperationId,
    /// Store-assigned insertion sequence (final ordering tie-break)
    pub seq: i64,
    /// Organisation scope, if any
    pub org_id: Option<String>,
    /// Logical kind of the mutated row (e.g. "inspection")
    pub entity: String,
    /// Identifier of the mutated row
    pub entity_id: String,
    pub kind: OperationKind,
    /// Serialized mutation body
    pub payload: serde_json::Value,
    /// Remote row version the mutation was based on
    pub base_version: Option<i64>,
    pub status: OperationStatus,
    /// Number of failed push attempts
    pub retry_count: i64,
    /// Scheduling gate (Unix ms)
    pub next_attempt_at: i64,
    /// Last failure reason
    pub last_error: Option<String>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last transition timestamp (Unix ms)
    pub updated_at: i64,
}

impl Operation {
    /// Ordering key within an entity: creation time, then insertion order.
    pub const fn order_key(&self) -> (i64, i64) {
        (self.created_at, self.seq)
    }

    /// Key used for FIFO ordering per logical row
    pub fn entity_key(&self) -> (String, String) {
        (self.entity.clone(), self.entity_id.clone())
    }
}

/// Input for recording a new mutation in the outbox
#[derive(Debug, Clone, PartialEq)]
pub struct NewOperation {
    pub org_id: Option<String>,
    pub entity: String,
    pub entity_id: String,
    pub kind: OperationKind,
    pub payload: serde_json::Value,
    pub base_version: Option<i64>,
}

impl NewOperation {
    /// Create a mutation for the given entity row
    pub fn new(
        entity: impl Into<String>,
        entity_id: impl Into<String>,
        kind: OperationKind,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            org_id: None,
            entity: entity.into(),
            entity_id: entity_id.into(),
            kind,
            payload,
            base_version: None,
        }
    }

    #[must_use]
    pub fn with_org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    #[must_use]
    pub const fn with_base_version(mut self, version: i64) -> Self {
        self.base_version = Some(version);
        self
    }

    /// Trim identifiers and reject empty ones
    pub fn validate(mut self) -> Result<Self> {
        self.entity = self.entity.trim().to_string();
        self.entity_id = self.entity_id.trim().to_string();
        if self.entity.is_empty() {
            return Err(Error::InvalidInput("entity must not be empty".into()));
        }
        if self.entity_id.is_empty() {
            return Err(Error::InvalidInput("entity_id must not be empty".into()));
        }
        self.org_id = crate::util::normalize_text_option(self.org_id);
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_id_unique() {
        let id1 = OperationId::new();
        let id2 = OperationId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_operation_id_parse() {
        let id = OperationId::new();
        let parsed: OperationId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_kind_parse_is_case_insensitive() {
        assert_eq!("UPDATE".parse::<OperationKind>().unwrap(), OperationKind::Update);
        assert!("upsert".parse::<OperationKind>().is_err());
    }

    #[test]
    fn test_status_text_matches_storage_form() {
        for status in [
            OperationStatus::Pending,
            OperationStatus::InFlight,
            OperationStatus::Failed,
            OperationStatus::Dead,
        ] {
            assert_eq!(status.as_str().parse::<OperationStatus>().unwrap(), status);
        }
        assert!(!OperationStatus::Dead.is_unconfirmed());
        assert!(OperationStatus::Failed.is_unconfirmed());
    }

    #[test]
    fn test_new_operation_validation() {
        let op = NewOperation::new(" task ", " t-1 ", OperationKind::Create, json!({}))
            .with_org("  ")
            .validate()
            .unwrap();
        assert_eq!(op.entity, "task");
        assert_eq!(op.entity_id, "t-1");
        assert_eq!(op.org_id, None);

        let err = NewOperation::new("task", "", OperationKind::Create, json!({}))
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("entity_id"));
    }
}
