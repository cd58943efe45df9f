//! Outbox repository implementation

use libsql::{params, Connection, Value};

use crate::error::{Error, Result};
use crate::models::{NewOperation, Operation, OperationId, OperationStatus};

use super::values::{int_or_null, json, limit, opt_int, opt_text, text_or_null};

const OPERATION_COLUMNS: &str = "seq, id, org_id, entity, entity_id, kind, payload, base_version, \
     status, retry_count, next_attempt_at, last_error, created_at, updated_at";

/// Trait for outbox storage operations (async)
///
/// Every timestamp is passed in by the caller so scheduling follows the
/// injected clock rather than the wall clock.
#[allow(async_fn_in_trait)]
pub trait OutboxRepository {
    /// Insert a new pending operation, due immediately
    async fn insert(&self, draft: &NewOperation, now: i64) -> Result<Operation>;

    /// Get an operation by ID
    async fn get(&self, id: &OperationId) -> Result<Option<Operation>>;

    /// Waiting operations due at `as_of`, oldest first
    async fn pending(&self, limit: usize, as_of: i64) -> Result<Vec<Operation>>;

    /// Due operations that are safe to push now, oldest first
    ///
    /// Excludes operations with an open conflict and operations queued behind
    /// an earlier unconfirmed operation on the same entity row that is not
    /// itself ready. Within one entity row insertion order (`seq`) wins over
    /// `created_at`, so a wall clock stepping backwards cannot reorder it.
    async fn next_batch(&self, limit: usize, as_of: i64) -> Result<Vec<Operation>>;

    /// Operations with at least `min_retry_count` failed attempts, most retried first
    async fn failed(&self, limit: usize, min_retry_count: i64) -> Result<Vec<Operation>>;

    /// Dead-lettered operations, oldest first
    async fn dead(&self, limit: usize) -> Result<Vec<Operation>>;

    async fn mark_in_flight(&self, id: &OperationId, now: i64) -> Result<()>;

    /// Remove a confirmed operation
    async fn mark_done(&self, id: &OperationId) -> Result<()>;

    /// Record a failed attempt and reschedule
    async fn mark_failed(
        &self,
        id: &OperationId,
        error: &str,
        next_attempt_at: i64,
        now: i64,
    ) -> Result<()>;

    /// Record a failed attempt and stop retrying
    async fn mark_dead(&self, id: &OperationId, error: &str, now: i64) -> Result<()>;

    /// Return an in-flight operation to its waiting state without using retry budget
    async fn release(&self, id: &OperationId, error: &str, now: i64) -> Result<()>;

    /// Release every in-flight operation (crash recovery)
    async fn recover_in_flight(&self, now: i64) -> Result<u64>;

    /// Move all dead operations back to pending with a fresh retry budget
    async fn retry_all_dead(&self, now: i64) -> Result<u64>;

    /// Re-queue a waiting or dead operation, optionally replacing its payload
    async fn requeue(
        &self,
        id: &OperationId,
        payload: Option<&serde_json::Value>,
        base_version: Option<i64>,
        now: i64,
    ) -> Result<()>;

    /// Delete an operation regardless of status (except in flight)
    async fn delete(&self, id: &OperationId) -> Result<bool>;

    /// Pending, failed, and in-flight operations
    async fn count_pending(&self) -> Result<i64>;

    async fn count_dead(&self) -> Result<i64>;

    /// Queue depth restricted to the given entity kinds
    async fn count_pending_for_entities(&self, entities: &[String]) -> Result<i64>;

    /// Earliest retry time strictly after `after`, if any
    async fn next_due_after(&self, after: i64) -> Result<Option<i64>>;
}

/// libSQL implementation of `OutboxRepository`
pub struct LibSqlOutboxRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlOutboxRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse an operation from a database row
    fn parse_operation(row: &libsql::Row) -> Result<Operation> {
        let id: String = row.get(1)?;
        let kind: String = row.get(5)?;
        let status: String = row.get(8)?;
        Ok(Operation {
            seq: row.get(0)?,
            id: id
                .parse()
                .map_err(|_| Error::Database(format!("invalid operation id: {id}")))?,
            org_id: opt_text(row, 2)?,
            entity: row.get(3)?,
            entity_id: row.get(4)?,
            kind: kind.parse()?,
            payload: json(row, 6)?,
            base_version: opt_int(row, 7)?,
            status: status.parse()?,
            retry_count: row.get(9)?,
            next_attempt_at: row.get(10)?,
            last_error: opt_text(row, 11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    async fn query_operations(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<Operation>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut operations = Vec::new();
        while let Some(row) = rows.next().await? {
            operations.push(Self::parse_operation(&row)?);
        }
        Ok(operations)
    }

    async fn count(&self, sql: &str, params: impl libsql::params::IntoParams) -> Result<i64> {
        let mut rows = self.conn.query(sql, params).await?;
        match rows.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(0),
        }
    }

    /// Turn a zero-row transition into a precise error
    async fn ensure_transition(&self, affected: u64, id: &OperationId, target: &str) -> Result<()> {
        if affected > 0 {
            return Ok(());
        }
        match self.get(id).await? {
            None => Err(Error::NotFound(id.to_string())),
            Some(operation) => Err(Error::InvalidInput(format!(
                "operation {id} cannot move from {} to {target}",
                operation.status
            ))),
        }
    }
}

impl OutboxRepository for LibSqlOutboxRepository<'_> {
    async fn insert(&self, draft: &NewOperation, now: i64) -> Result<Operation> {
        let id = OperationId::new();
        let payload = serde_json::to_string(&draft.payload)?;

        self.conn
            .execute(
                "INSERT INTO outbox (id, org_id, entity, entity_id, kind, payload, base_version,
                                     status, retry_count, next_attempt_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', 0, ?8, ?8, ?8)",
                params![
                    id.as_str(),
                    text_or_null(draft.org_id.as_deref()),
                    draft.entity.as_str(),
                    draft.entity_id.as_str(),
                    draft.kind.as_str(),
                    payload,
                    int_or_null(draft.base_version),
                    now
                ],
            )
            .await?;

        self.get(&id)
            .await?
            .ok_or_else(|| Error::Database(format!("operation {id} missing after insert")))
    }

    async fn get(&self, id: &OperationId) -> Result<Option<Operation>> {
        let sql = format!("SELECT {OPERATION_COLUMNS} FROM outbox WHERE id = ?1");
        let mut operations = self.query_operations(&sql, params![id.as_str()]).await?;
        Ok(operations.pop())
    }

    async fn pending(&self, limit_rows: usize, as_of: i64) -> Result<Vec<Operation>> {
        let sql = format!(
            "SELECT {OPERATION_COLUMNS} FROM outbox
             WHERE status IN ('pending', 'failed') AND next_attempt_at <= ?1
             ORDER BY created_at ASC, seq ASC
             LIMIT ?2"
        );
        self.query_operations(&sql, params![as_of, limit(limit_rows)])
            .await
    }

    async fn next_batch(&self, limit_rows: usize, as_of: i64) -> Result<Vec<Operation>> {
        let sql = format!(
            "WITH live AS (
                SELECT o.*,
                       (o.status IN ('pending', 'failed')
                        AND o.next_attempt_at <= ?1
                        AND NOT EXISTS (
                            SELECT 1 FROM sync_conflicts c
                            WHERE c.operation_id = o.id AND c.status = 'open'
                        )) AS ready,
                       MAX(o.created_at) OVER (
                           PARTITION BY o.entity, o.entity_id
                           ORDER BY o.seq
                           ROWS UNBOUNDED PRECEDING
                       ) AS entity_clock
                FROM outbox o
                WHERE o.status IN ('pending', 'failed', 'in_flight')
             )
             SELECT {OPERATION_COLUMNS} FROM live o
             WHERE o.ready = 1
               AND NOT EXISTS (
                   SELECT 1 FROM live p
                   WHERE p.entity = o.entity
                     AND p.entity_id = o.entity_id
                     AND p.ready = 0
                     AND p.seq < o.seq
               )
             ORDER BY o.entity_clock ASC, o.seq ASC
             LIMIT ?2"
        );
        self.query_operations(&sql, params![as_of, limit(limit_rows)])
            .await
    }

    async fn failed(&self, limit_rows: usize, min_retry_count: i64) -> Result<Vec<Operation>> {
        let sql = format!(
            "SELECT {OPERATION_COLUMNS} FROM outbox
             WHERE retry_count >= ?1
             ORDER BY retry_count DESC, created_at ASC, seq ASC
             LIMIT ?2"
        );
        self.query_operations(&sql, params![min_retry_count, limit(limit_rows)])
            .await
    }

    async fn dead(&self, limit_rows: usize) -> Result<Vec<Operation>> {
        let sql = format!(
            "SELECT {OPERATION_COLUMNS} FROM outbox
             WHERE status = 'dead'
             ORDER BY created_at ASC, seq ASC
             LIMIT ?1"
        );
        self.query_operations(&sql, params![limit(limit_rows)]).await
    }

    async fn mark_in_flight(&self, id: &OperationId, now: i64) -> Result<()> {
        let affected = self
            .conn
            .execute(
                "UPDATE outbox SET status = 'in_flight', updated_at = ?1
                 WHERE id = ?2 AND status IN ('pending', 'failed')",
                params![now, id.as_str()],
            )
            .await?;
        self.ensure_transition(affected, id, OperationStatus::InFlight.as_str())
            .await
    }

    async fn mark_done(&self, id: &OperationId) -> Result<()> {
        let affected = self
            .conn
            .execute(
                "DELETE FROM outbox WHERE id = ?1 AND status = 'in_flight'",
                params![id.as_str()],
            )
            .await?;
        self.ensure_transition(affected, id, "done").await
    }

    async fn mark_failed(
        &self,
        id: &OperationId,
        error: &str,
        next_attempt_at: i64,
        now: i64,
    ) -> Result<()> {
        let affected = self
            .conn
            .execute(
                "UPDATE outbox
                 SET status = 'failed', retry_count = retry_count + 1,
                     next_attempt_at = ?1, last_error = ?2, updated_at = ?3
                 WHERE id = ?4 AND status = 'in_flight'",
                params![next_attempt_at, error, now, id.as_str()],
            )
            .await?;
        self.ensure_transition(affected, id, OperationStatus::Failed.as_str())
            .await
    }

    async fn mark_dead(&self, id: &OperationId, error: &str, now: i64) -> Result<()> {
        let affected = self
            .conn
            .execute(
                "UPDATE outbox
                 SET status = 'dead', retry_count = retry_count + 1,
                     last_error = ?1, updated_at = ?2
                 WHERE id = ?3 AND status != 'dead'",
                params![error, now, id.as_str()],
            )
            .await?;
        self.ensure_transition(affected, id, OperationStatus::Dead.as_str())
            .await
    }

    async fn release(&self, id: &OperationId, error: &str, now: i64) -> Result<()> {
        let affected = self
            .conn
            .execute(
                "UPDATE outbox
                 SET status = CASE WHEN retry_count > 0 THEN 'failed' ELSE 'pending' END,
                     last_error = ?1, updated_at = ?2
                 WHERE id = ?3 AND status = 'in_flight'",
                params![error, now, id.as_str()],
            )
            .await?;
        self.ensure_transition(affected, id, "waiting").await
    }

    async fn recover_in_flight(&self, now: i64) -> Result<u64> {
        let affected = self
            .conn
            .execute(
                "UPDATE outbox
                 SET status = CASE WHEN retry_count > 0 THEN 'failed' ELSE 'pending' END,
                     updated_at = ?1
                 WHERE status = 'in_flight'",
                params![now],
            )
            .await?;
        Ok(affected)
    }

    async fn retry_all_dead(&self, now: i64) -> Result<u64> {
        let affected = self
            .conn
            .execute(
                "UPDATE outbox
                 SET status = 'pending', retry_count = 0,
                     next_attempt_at = ?1, updated_at = ?1
                 WHERE status = 'dead'",
                params![now],
            )
            .await?;
        Ok(affected)
    }

    async fn requeue(
        &self,
        id: &OperationId,
        payload: Option<&serde_json::Value>,
        base_version: Option<i64>,
        now: i64,
    ) -> Result<()> {
        let payload = super::values::json_or_null(payload)?;
        let affected = self
            .conn
            .execute(
                "UPDATE outbox
                 SET status = 'pending', retry_count = 0, next_attempt_at = ?1,
                     payload = COALESCE(?2, payload),
                     base_version = COALESCE(?3, base_version),
                     last_error = NULL, updated_at = ?1
                 WHERE id = ?4 AND status != 'in_flight'",
                params![now, payload, int_or_null(base_version), id.as_str()],
            )
            .await?;
        self.ensure_transition(affected, id, OperationStatus::Pending.as_str())
            .await
    }

    async fn delete(&self, id: &OperationId) -> Result<bool> {
        let affected = self
            .conn
            .execute(
                "DELETE FROM outbox WHERE id = ?1 AND status != 'in_flight'",
                params![id.as_str()],
            )
            .await?;
        Ok(affected > 0)
    }

    async fn count_pending(&self) -> Result<i64> {
        self.count(
            "SELECT COUNT(*) FROM outbox WHERE status IN ('pending', 'failed', 'in_flight')",
            (),
        )
        .await
    }

    async fn count_dead(&self) -> Result<i64> {
        self.count("SELECT COUNT(*) FROM outbox WHERE status = 'dead'", ())
            .await
    }

    async fn count_pending_for_entities(&self, entities: &[String]) -> Result<i64> {
        if entities.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; entities.len()].join(", ");
        let sql = format!(
            "SELECT COUNT(*) FROM outbox
             WHERE status IN ('pending', 'failed', 'in_flight') AND entity IN ({placeholders})"
        );
        let values = entities
            .iter()
            .map(|entity| Value::Text(entity.clone()))
            .collect::<Vec<_>>();
        self.count(&sql, values).await
    }

    async fn next_due_after(&self, after: i64) -> Result<Option<i64>> {
        let mut rows = self
            .conn
            .query(
                "SELECT MIN(next_attempt_at) FROM outbox
                 WHERE status IN ('pending', 'failed') AND next_attempt_at > ?1",
                params![after],
            )
            .await?;
        match rows.next().await? {
            Some(row) => opt_int(&row, 0),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::OperationKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn draft(entity_id: &str) -> NewOperation {
        NewOperation::new("task", entity_id, OperationKind::Update, json!({ "title": entity_id }))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_insert_and_get() {
        let db = setup().await;
        let repo = LibSqlOutboxRepository::new(db.connection());

        let op = repo
            .insert(&draft("t-1").with_org("org-1").with_base_version(3), 1_000)
            .await
            .unwrap();
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.retry_count, 0);
        assert_eq!(op.next_attempt_at, 1_000);
        assert_eq!(op.created_at, 1_000);

        let fetched = repo.get(&op.id).await.unwrap().unwrap();
        assert_eq!(fetched, op);
        assert_eq!(fetched.org_id.as_deref(), Some("org-1"));
        assert_eq!(fetched.base_version, Some(3));
        assert_eq!(fetched.payload, json!({ "title": "t-1" }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pending_respects_due_time_order_and_limit() {
        let db = setup().await;
        let repo = LibSqlOutboxRepository::new(db.connection());

        let later = repo.insert(&draft("b"), 2_000).await.unwrap();
        let earlier = repo.insert(&draft("a"), 1_000).await.unwrap();
        repo.insert(&draft("future"), 9_000).await.unwrap();

        let due = repo.pending(10, 5_000).await.unwrap();
        let ids = due.iter().map(|op| op.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![earlier.id, later.id]);

        let capped = repo.pending(1, 5_000).await.unwrap();
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].id, earlier.id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_next_batch_holds_back_successors_of_waiting_rows() {
        let db = setup().await;
        let repo = LibSqlOutboxRepository::new(db.connection());

        let first = repo.insert(&draft("x"), 1_000).await.unwrap();
        let second = repo.insert(&draft("x"), 1_001).await.unwrap();
        let other = repo.insert(&draft("y"), 1_002).await.unwrap();

        // Both rows of entity x are ready, so both come back in order
        let batch = repo.next_batch(10, 2_000).await.unwrap();
        let ids = batch.iter().map(|op| op.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![first.id, second.id, other.id]);

        // Once the head of x backs off, its successor must wait too
        repo.mark_in_flight(&first.id, 2_000).await.unwrap();
        repo.mark_failed(&first.id, "boom", 60_000, 2_000)
            .await
            .unwrap();
        let batch = repo.next_batch(10, 3_000).await.unwrap();
        let ids = batch.iter().map(|op| op.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![other.id]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_next_batch_keeps_insert_order_when_clock_steps_back() {
        let db = setup().await;
        let repo = LibSqlOutboxRepository::new(db.connection());

        let first = repo.insert(&draft("x"), 10_000).await.unwrap();
        let other = repo.insert(&draft("y"), 9_500).await.unwrap();
        // Wall clock corrected backwards before the next edit of x
        let second = repo.insert(&draft("x"), 9_000).await.unwrap();

        let batch = repo.next_batch(10, 20_000).await.unwrap();
        let ids = batch.iter().map(|op| op.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![other.id, first.id, second.id]);

        repo.mark_in_flight(&first.id, 20_000).await.unwrap();
        repo.mark_failed(&first.id, "503", 60_000, 20_000)
            .await
            .unwrap();
        let batch = repo.next_batch(10, 21_000).await.unwrap();
        let ids = batch.iter().map(|op| op.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![other.id]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dead_predecessor_does_not_block() {
        let db = setup().await;
        let repo = LibSqlOutboxRepository::new(db.connection());

        let first = repo.insert(&draft("x"), 1_000).await.unwrap();
        let second = repo.insert(&draft("x"), 1_001).await.unwrap();
        repo.mark_dead(&first.id, "rejected", 1_500).await.unwrap();

        let batch = repo.next_batch(10, 2_000).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, second.id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_transitions_and_counts() {
        let db = setup().await;
        let repo = LibSqlOutboxRepository::new(db.connection());

        let op = repo.insert(&draft("t"), 1_000).await.unwrap();
        assert_eq!(repo.count_pending().await.unwrap(), 1);

        repo.mark_in_flight(&op.id, 1_100).await.unwrap();
        assert_eq!(repo.count_pending().await.unwrap(), 1);

        repo.mark_failed(&op.id, "503", 5_000, 1_200).await.unwrap();
        let failed = repo.get(&op.id).await.unwrap().unwrap();
        assert_eq!(failed.status, OperationStatus::Failed);
        assert_eq!(failed.retry_count, 1);
        assert_eq!(failed.next_attempt_at, 5_000);
        assert_eq!(failed.last_error.as_deref(), Some("503"));

        repo.mark_in_flight(&op.id, 5_000).await.unwrap();
        repo.mark_done(&op.id).await.unwrap();
        assert!(repo.get(&op.id).await.unwrap().is_none());
        assert_eq!(repo.count_pending().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_transition_reports_status() {
        let db = setup().await;
        let repo = LibSqlOutboxRepository::new(db.connection());

        let op = repo.insert(&draft("t"), 1_000).await.unwrap();
        let err = repo.mark_done(&op.id).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let missing = OperationId::new();
        let err = repo.mark_in_flight(&missing, 1_000).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_release_keeps_retry_budget() {
        let db = setup().await;
        let repo = LibSqlOutboxRepository::new(db.connection());

        let op = repo.insert(&draft("t"), 1_000).await.unwrap();
        repo.mark_in_flight(&op.id, 1_000).await.unwrap();
        repo.release(&op.id, "connection refused", 1_001)
            .await
            .unwrap();

        let released = repo.get(&op.id).await.unwrap().unwrap();
        assert_eq!(released.status, OperationStatus::Pending);
        assert_eq!(released.retry_count, 0);
        assert_eq!(released.next_attempt_at, 1_000);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_recover_in_flight_after_crash() {
        let db = setup().await;
        let repo = LibSqlOutboxRepository::new(db.connection());

        let fresh = repo.insert(&draft("a"), 1_000).await.unwrap();
        let retried = repo.insert(&draft("b"), 1_000).await.unwrap();
        repo.mark_in_flight(&retried.id, 1_000).await.unwrap();
        repo.mark_failed(&retried.id, "503", 1_000, 1_000)
            .await
            .unwrap();
        repo.mark_in_flight(&fresh.id, 1_100).await.unwrap();
        repo.mark_in_flight(&retried.id, 1_100).await.unwrap();

        assert_eq!(repo.recover_in_flight(2_000).await.unwrap(), 2);
        let fresh = repo.get(&fresh.id).await.unwrap().unwrap();
        let retried = repo.get(&retried.id).await.unwrap().unwrap();
        assert_eq!(fresh.status, OperationStatus::Pending);
        assert_eq!(retried.status, OperationStatus::Failed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_retry_all_dead() {
        let db = setup().await;
        let repo = LibSqlOutboxRepository::new(db.connection());

        assert_eq!(repo.retry_all_dead(1_000).await.unwrap(), 0);

        let op = repo.insert(&draft("t"), 1_000).await.unwrap();
        repo.mark_dead(&op.id, "gone", 1_100).await.unwrap();
        assert_eq!(repo.count_dead().await.unwrap(), 1);
        assert_eq!(repo.count_pending().await.unwrap(), 0);

        assert_eq!(repo.retry_all_dead(2_000).await.unwrap(), 1);
        let revived = repo.get(&op.id).await.unwrap().unwrap();
        assert_eq!(revived.status, OperationStatus::Pending);
        assert_eq!(revived.retry_count, 0);
        assert_eq!(revived.next_attempt_at, 2_000);
        assert_eq!(revived.last_error.as_deref(), Some("gone"));
        assert_eq!(repo.count_dead().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_listing_and_entity_counts() {
        let db = setup().await;
        let repo = LibSqlOutboxRepository::new(db.connection());

        let op = repo.insert(&draft("t"), 1_000).await.unwrap();
        repo.insert(
            &NewOperation::new("media", "m-1", OperationKind::Create, json!({})),
            1_000,
        )
        .await
        .unwrap();
        repo.mark_in_flight(&op.id, 1_000).await.unwrap();
        repo.mark_failed(&op.id, "503", 9_000, 1_000).await.unwrap();

        let failed = repo.failed(10, 1).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, op.id);
        assert_eq!(repo.failed(10, 0).await.unwrap().len(), 2);

        let uploads = repo
            .count_pending_for_entities(&["media".to_string()])
            .await
            .unwrap();
        assert_eq!(uploads, 1);
        assert_eq!(repo.count_pending_for_entities(&[]).await.unwrap(), 0);

        assert_eq!(repo.next_due_after(1_000).await.unwrap(), Some(9_000));
        assert_eq!(repo.next_due_after(9_000).await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_requeue_replaces_payload_and_version() {
        let db = setup().await;
        let repo = LibSqlOutboxRepository::new(db.connection());

        let op = repo.insert(&draft("t").with_base_version(1), 1_000).await.unwrap();
        repo.mark_in_flight(&op.id, 1_000).await.unwrap();
        repo.mark_failed(&op.id, "conflict", 50_000, 1_000)
            .await
            .unwrap();

        let merged = json!({ "title": "merged" });
        repo.requeue(&op.id, Some(&merged), Some(7), 2_000)
            .await
            .unwrap();
        let requeued = repo.get(&op.id).await.unwrap().unwrap();
        assert_eq!(requeued.status, OperationStatus::Pending);
        assert_eq!(requeued.payload, merged);
        assert_eq!(requeued.base_version, Some(7));
        assert_eq!(requeued.retry_count, 0);
        assert_eq!(requeued.next_attempt_at, 2_000);
        assert_eq!(requeued.last_error, None);

        repo.requeue(&op.id, None, None, 3_000).await.unwrap();
        let kept = repo.get(&op.id).await.unwrap().unwrap();
        assert_eq!(kept.payload, merged);
        assert_eq!(kept.base_version, Some(7));

        assert!(repo.delete(&op.id).await.unwrap());
        assert!(!repo.delete(&op.id).await.unwrap());
    }
}
