//! Shared outbox store used by the runtime and every observer.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::clock::{Clock, SystemClock};
use crate::config::SyncSettings;
use crate::db::{
    ConflictRepository, Database, LeaseRepository, LibSqlConflictRepository,
    LibSqlLeaseRepository, LibSqlOutboxRepository, OutboxRepository,
};
use crate::models::{
    ConflictStatus, NewOperation, Operation, OperationId, SyncConflict,
};
use crate::sync::{Resolution, RetryPolicy};
use crate::{Error, Result};

/// Thread-safe handle over the outbox database.
///
/// Every call takes the connection lock for its whole duration, so status
/// transitions on one row never interleave.
#[derive(Clone)]
pub struct SyncStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    upload_entities: Arc<[String]>,
}

impl SyncStore {
    /// Open a store at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>, settings: &SyncSettings) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::debug!("Opening outbox store at {}", db_path.display());
        let db = Database::open(&db_path).await?;
        Ok(Self::from_database(db, Some(db_path), settings, Arc::new(SystemClock)))
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory(settings: &SyncSettings, clock: Arc<dyn Clock>) -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self::from_database(db, None, settings, clock))
    }

    fn from_database(
        db: Database,
        db_path: Option<PathBuf>,
        settings: &SyncSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            db_path,
            clock,
            policy: settings.retry_policy(),
            upload_entities: settings.upload_entities().into(),
        }
    }

    pub fn db_path(&self) -> Option<&PathBuf> {
        self.db_path.as_ref()
    }

    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Record a new mutation. Returns once the row is durable.
    pub async fn create(&self, draft: NewOperation) -> Result<Operation> {
        let draft = draft.validate()?;
        let now = self.now_ms();
        let db = self.db.lock().await;
        let repo = LibSqlOutboxRepository::new(db.connection());
        let operation = repo.insert(&draft, now).await?;
        tracing::debug!(
            "Queued {} {} {}/{}",
            operation.id,
            operation.kind,
            operation.entity,
            operation.entity_id
        );
        Ok(operation)
    }

    /// Fetch an operation by id.
    pub async fn get(&self, id: &OperationId) -> Result<Option<Operation>> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection()).get(id).await
    }

    /// Waiting operations due at `as_of`, oldest first.
    pub async fn get_pending_operations(&self, limit: usize, as_of: i64) -> Result<Vec<Operation>> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .pending(limit, as_of)
            .await
    }

    /// Due operations that can be pushed now without breaking per-entity order.
    pub async fn next_batch(&self, limit: usize, as_of: i64) -> Result<Vec<Operation>> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .next_batch(limit, as_of)
            .await
    }

    /// Diagnostic listing of operations with at least `min_retry_count` failures.
    pub async fn get_failed_operations(
        &self,
        limit: usize,
        min_retry_count: i64,
    ) -> Result<Vec<Operation>> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .failed(limit, min_retry_count)
            .await
    }

    /// Diagnostic listing of dead-lettered operations.
    pub async fn get_dead_operations(&self, limit: usize) -> Result<Vec<Operation>> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .dead(limit)
            .await
    }

    pub async fn mark_in_flight(&self, id: &OperationId) -> Result<()> {
        let now = self.now_ms();
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .mark_in_flight(id, now)
            .await
    }

    /// Remove a confirmed operation.
    pub async fn mark_done(&self, id: &OperationId) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .mark_done(id)
            .await
    }

    /// Count a failed attempt and reschedule it with backoff.
    pub async fn mark_failed(&self, id: &OperationId, error: &str) -> Result<Operation> {
        let now = self.now_ms();
        let db = self.db.lock().await;
        let repo = LibSqlOutboxRepository::new(db.connection());
        let current = repo
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        let failures = u32::try_from(current.retry_count.saturating_add(1)).unwrap_or(u32::MAX);
        let next_attempt_at = self.policy.next_attempt_at(now, failures);
        repo.mark_failed(id, error, next_attempt_at, now).await?;

        repo.get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Count a failed attempt and dead-letter the operation.
    pub async fn mark_dead(&self, id: &OperationId, error: &str) -> Result<()> {
        let now = self.now_ms();
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .mark_dead(id, error, now)
            .await
    }

    /// Hand an in-flight operation back without spending retry budget.
    pub async fn release(&self, id: &OperationId, error: &str) -> Result<()> {
        let now = self.now_ms();
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .release(id, error, now)
            .await
    }

    /// Take or extend the drain lease for `owner`.
    ///
    /// Returns false while another owner holds a lease that has not expired.
    pub async fn acquire_sync_lease(&self, owner: &str, ttl: Duration) -> Result<bool> {
        let now = self.now_ms();
        let expires_at = now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX));
        let db = self.db.lock().await;
        LibSqlLeaseRepository::new(db.connection())
            .acquire(owner, expires_at, now)
            .await
    }

    pub async fn release_sync_lease(&self, owner: &str) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlLeaseRepository::new(db.connection())
            .release(owner)
            .await
    }

    /// Owner of the live drain lease, if any.
    pub async fn sync_lease_holder(&self) -> Result<Option<String>> {
        let now = self.now_ms();
        let db = self.db.lock().await;
        LibSqlLeaseRepository::new(db.connection())
            .holder(now)
            .await
    }

    /// Release rows left in flight by a lease holder that is gone.
    ///
    /// Only safe while holding the drain lease.
    pub async fn recover_in_flight(&self) -> Result<u64> {
        let now = self.now_ms();
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .recover_in_flight(now)
            .await
    }

    /// Move every dead operation back to pending, due immediately.
    pub async fn retry_all_dead_operations(&self) -> Result<u64> {
        let now = self.now_ms();
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .retry_all_dead(now)
            .await
    }

    pub async fn count_pending_operations(&self) -> Result<i64> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .count_pending()
            .await
    }

    pub async fn count_dead_operations(&self) -> Result<i64> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .count_dead()
            .await
    }

    /// Unconfirmed operations on upload entity kinds.
    pub async fn count_pending_uploads(&self) -> Result<i64> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .count_pending_for_entities(&self.upload_entities)
            .await
    }

    /// Earliest scheduled retry strictly after `after`.
    pub async fn next_due_after(&self, after: i64) -> Result<Option<i64>> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .next_due_after(after)
            .await
    }

    /// Record or refresh the conflict for an operation.
    pub async fn record_conflict(
        &self,
        operation: &Operation,
        remote_payload: Option<&serde_json::Value>,
        remote_version: Option<i64>,
    ) -> Result<SyncConflict> {
        let now = self.now_ms();
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection())
            .record(operation, remote_payload, remote_version, now)
            .await
    }

    pub async fn get_conflict(&self, id: i64) -> Result<Option<SyncConflict>> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection()).get(id).await
    }

    /// List conflicts newest first.
    pub async fn list_conflicts(
        &self,
        status: Option<ConflictStatus>,
        org_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SyncConflict>> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection())
            .list(status, org_id, limit)
            .await
    }

    /// Open conflicts, for one organisation or all of them.
    pub async fn open_conflict_count(&self, org_id: Option<&str>) -> Result<i64> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection())
            .open_count(org_id)
            .await
    }

    /// Apply a human decision to an open conflict and its operation atomically.
    pub async fn resolve_conflict(
        &self,
        conflict_id: i64,
        resolution: &Resolution,
    ) -> Result<SyncConflict> {
        let now = self.now_ms();
        let db = self.db.lock().await;
        let conn = db.connection();
        let conflicts = LibSqlConflictRepository::new(conn);
        let outbox = LibSqlOutboxRepository::new(conn);

        let conflict = conflicts
            .get(conflict_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("conflict {conflict_id}")))?;
        if !conflict.is_open() {
            return Err(Error::InvalidInput(format!(
                "conflict {conflict_id} is already resolved"
            )));
        }

        conn.execute("BEGIN TRANSACTION", ()).await?;
        let applied = async {
            let operation_exists = outbox.get(&conflict.operation_id).await?.is_some();
            match resolution {
                Resolution::KeepLocal if operation_exists => {
                    outbox
                        .requeue(&conflict.operation_id, None, conflict.remote_version, now)
                        .await?;
                }
                Resolution::Merge(payload) if operation_exists => {
                    outbox
                        .requeue(
                            &conflict.operation_id,
                            Some(payload),
                            conflict.remote_version,
                            now,
                        )
                        .await?;
                }
                Resolution::KeepRemote => {
                    outbox.delete(&conflict.operation_id).await?;
                }
                Resolution::KeepLocal | Resolution::Merge(_) => {
                    tracing::warn!(
                        "Operation {} for conflict {} no longer exists; closing conflict only",
                        conflict.operation_id,
                        conflict_id
                    );
                }
            }
            conflicts
                .mark_resolved(conflict_id, resolution.kind(), now)
                .await
        }
        .await;

        match applied {
            Ok(()) => {
                if let Err(error) = conn.execute("COMMIT", ()).await {
                    conn.execute("ROLLBACK", ()).await.ok();
                    return Err(error.into());
                }
            }
            Err(error) => {
                conn.execute("ROLLBACK", ()).await.ok();
                return Err(error);
            }
        }

        conflicts
            .get(conflict_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("conflict {conflict_id}")))
    }
}
