//! Version conflict detection and manual resolution.

use serde_json::Value;

use crate::models::{ConflictResolution, ConflictStatus, Operation, SyncConflict};
use crate::services::SyncStore;
use crate::Result;

use super::backend::PushError;

/// Human decision for an open conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Re-push the local mutation on top of the remote version
    KeepLocal,
    /// Drop the local mutation
    KeepRemote,
    /// Re-push a merged payload on top of the remote version
    Merge(Value),
}

impl Resolution {
    pub const fn kind(&self) -> ConflictResolution {
        match self {
            Self::KeepLocal => ConflictResolution::KeepLocal,
            Self::KeepRemote => ConflictResolution::KeepRemote,
            Self::Merge(_) => ConflictResolution::Merge,
        }
    }
}

/// Turns version-mismatch push failures into persisted conflicts.
#[derive(Clone)]
pub struct ConflictDetector {
    store: SyncStore,
}

impl ConflictDetector {
    pub const fn new(store: SyncStore) -> Self {
        Self { store }
    }

    /// Record a conflict when `error` is a version mismatch.
    ///
    /// Any other push failure returns `None` and records nothing.
    pub async fn detect(
        &self,
        operation: &Operation,
        error: &PushError,
    ) -> Result<Option<SyncConflict>> {
        let PushError::Conflict {
            remote_version,
            remote_payload,
        } = error
        else {
            return Ok(None);
        };

        let conflict = self
            .store
            .record_conflict(operation, remote_payload.as_ref(), *remote_version)
            .await?;
        tracing::warn!(
            "Conflict {} on {}/{} (local base {:?}, remote {:?})",
            conflict.id,
            conflict.entity,
            conflict.entity_id,
            conflict.local_base_version,
            conflict.remote_version
        );
        Ok(Some(conflict))
    }

    pub async fn open_count(&self, org_id: Option<&str>) -> Result<i64> {
        self.store.open_conflict_count(org_id).await
    }

    pub async fn list(
        &self,
        status: Option<ConflictStatus>,
        limit: usize,
    ) -> Result<Vec<SyncConflict>> {
        self.store.list_conflicts(status, None, limit).await
    }

    pub async fn get(&self, id: i64) -> Result<Option<SyncConflict>> {
        self.store.get_conflict(id).await
    }
}

/// Applies human resolutions. Nothing here runs automatically.
#[derive(Clone)]
pub struct ConflictResolver {
    store: SyncStore,
}

impl ConflictResolver {
    pub const fn new(store: SyncStore) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, conflict_id: i64, resolution: Resolution) -> Result<SyncConflict> {
        let conflict = self.store.resolve_conflict(conflict_id, &resolution).await?;
        tracing::info!(
            "Resolved conflict {} on {}/{} with {}",
            conflict.id,
            conflict.entity,
            conflict.entity_id,
            resolution.kind()
        );
        Ok(conflict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::SyncSettings;
    use crate::models::{NewOperation, OperationKind};
    use crate::Error;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn store() -> SyncStore {
        SyncStore::open_in_memory(&SyncSettings::default(), ManualClock::shared(1_000))
            .await
            .unwrap()
    }

    async fn queued(store: &SyncStore, org: &str) -> Operation {
        store
            .create(
                NewOperation::new("asset", "a-1", OperationKind::Update, json!({ "n": 1 }))
                    .with_org(org)
                    .with_base_version(1),
            )
            .await
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn only_version_mismatch_is_recorded() {
        let store = store().await;
        let detector = ConflictDetector::new(store.clone());
        let op = queued(&store, "org-a").await;

        for error in [
            PushError::Unreachable("down".into()),
            PushError::Transient("503".into()),
            PushError::Rejected("400".into()),
            PushError::Unauthorized("401".into()),
        ] {
            assert_eq!(detector.detect(&op, &error).await.unwrap(), None);
        }
        assert_eq!(detector.open_count(None).await.unwrap(), 0);

        let conflict = detector
            .detect(
                &op,
                &PushError::Conflict {
                    remote_version: Some(2),
                    remote_payload: Some(json!({ "n": 5 })),
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(conflict.local_payload, json!({ "n": 1 }));
        assert_eq!(conflict.remote_payload, Some(json!({ "n": 5 })));
        assert_eq!(detector.open_count(Some("org-a")).await.unwrap(), 1);
        assert_eq!(detector.open_count(Some("org-b")).await.unwrap(), 0);
        assert_eq!(detector.get(conflict.id).await.unwrap(), Some(conflict));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resolver_closes_conflict_once() {
        let store = store().await;
        let detector = ConflictDetector::new(store.clone());
        let resolver = ConflictResolver::new(store.clone());
        let op = queued(&store, "org-a").await;
        let conflict = detector
            .detect(
                &op,
                &PushError::Conflict {
                    remote_version: Some(4),
                    remote_payload: None,
                },
            )
            .await
            .unwrap()
            .unwrap();

        let resolved = resolver
            .resolve(conflict.id, Resolution::KeepLocal)
            .await
            .unwrap();
        assert_eq!(resolved.resolution, Some(ConflictResolution::KeepLocal));
        assert_eq!(
            store.get(&op.id).await.unwrap().unwrap().base_version,
            Some(4)
        );
        assert!(detector
            .list(Some(ConflictStatus::Open), 10)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(detector.list(None, 10).await.unwrap().len(), 1);

        let err = resolver
            .resolve(conflict.id, Resolution::KeepRemote)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        let err = resolver
            .resolve(404, Resolution::KeepRemote)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
