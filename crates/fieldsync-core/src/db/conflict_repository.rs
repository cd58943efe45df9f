//! Conflict repository implementation

use libsql::{params, Connection};

use crate::error::{Error, Result};
use crate::models::{ConflictResolution, ConflictStatus, Operation, OperationId, SyncConflict};

use super::values::{
    int_or_null, json, json_or_null, limit, opt_int, opt_json, opt_text, text_or_null,
};

const CONFLICT_COLUMNS: &str = "id, operation_id, org_id, entity, entity_id, local_payload, \
     local_base_version, remote_payload, remote_version, status, resolution, detected_at, resolved_at";

/// Trait for conflict storage operations (async)
#[allow(async_fn_in_trait)]
pub trait ConflictRepository {
    /// Record a version mismatch for an operation
    ///
    /// When the operation already has an open conflict, the remote side of
    /// that record is refreshed instead of inserting a second one.
    async fn record(
        &self,
        operation: &Operation,
        remote_payload: Option<&serde_json::Value>,
        remote_version: Option<i64>,
        now: i64,
    ) -> Result<SyncConflict>;

    async fn get(&self, id: i64) -> Result<Option<SyncConflict>>;

    async fn open_for_operation(&self, operation_id: &OperationId) -> Result<Option<SyncConflict>>;

    /// List conflicts, newest first
    async fn list(
        &self,
        status: Option<ConflictStatus>,
        org_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SyncConflict>>;

    /// Count open conflicts, optionally for one organisation
    async fn open_count(&self, org_id: Option<&str>) -> Result<i64>;

    /// Close an open conflict
    async fn mark_resolved(
        &self,
        id: i64,
        resolution: ConflictResolution,
        now: i64,
    ) -> Result<()>;
}

/// libSQL implementation of `ConflictRepository`
pub struct LibSqlConflictRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_conflict(row: &libsql::Row) -> Result<SyncConflict> {
        let operation_id: String = row.get(1)?;
        let status: String = row.get(9)?;
        Ok(SyncConflict {
            id: row.get(0)?,
            operation_id: operation_id
                .parse()
                .map_err(|_| Error::Database(format!("invalid operation id: {operation_id}")))?,
            org_id: opt_text(row, 2)?,
            entity: row.get(3)?,
            entity_id: row.get(4)?,
            local_payload: json(row, 5)?,
            local_base_version: opt_int(row, 6)?,
            remote_payload: opt_json(row, 7)?,
            remote_version: opt_int(row, 8)?,
            status: status.parse()?,
            resolution: opt_text(row, 10)?
                .map(|value| value.parse())
                .transpose()?,
            detected_at: row.get(11)?,
            resolved_at: opt_int(row, 12)?,
        })
    }

    async fn query_conflicts(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<SyncConflict>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut conflicts = Vec::new();
        while let Some(row) = rows.next().await? {
            conflicts.push(Self::parse_conflict(&row)?);
        }
        Ok(conflicts)
    }
}

impl ConflictRepository for LibSqlConflictRepository<'_> {
    async fn record(
        &self,
        operation: &Operation,
        remote_payload: Option<&serde_json::Value>,
        remote_version: Option<i64>,
        now: i64,
    ) -> Result<SyncConflict> {
        let local_payload = serde_json::to_string(&operation.payload)?;
        let remote_payload = json_or_null(remote_payload)?;

        if let Some(existing) = self.open_for_operation(&operation.id).await? {
            self.conn
                .execute(
                    "UPDATE sync_conflicts
                     SET local_payload = ?1, local_base_version = ?2,
                         remote_payload = ?3, remote_version = ?4
                     WHERE id = ?5",
                    params![
                        local_payload,
                        int_or_null(operation.base_version),
                        remote_payload,
                        int_or_null(remote_version),
                        existing.id
                    ],
                )
                .await?;
            return self
                .get(existing.id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("conflict {}", existing.id)));
        }

        self.conn
            .execute(
                "INSERT INTO sync_conflicts (
                    operation_id, org_id, entity, entity_id, local_payload,
                    local_base_version, remote_payload, remote_version, status, detected_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'open', ?9)",
                params![
                    operation.id.as_str(),
                    text_or_null(operation.org_id.as_deref()),
                    operation.entity.as_str(),
                    operation.entity_id.as_str(),
                    local_payload,
                    int_or_null(operation.base_version),
                    remote_payload,
                    int_or_null(remote_version),
                    now
                ],
            )
            .await?;

        self.open_for_operation(&operation.id)
            .await?
            .ok_or_else(|| Error::Database(format!("conflict for {} missing after insert", operation.id)))
    }

    async fn get(&self, id: i64) -> Result<Option<SyncConflict>> {
        let sql = format!("SELECT {CONFLICT_COLUMNS} FROM sync_conflicts WHERE id = ?1");
        Ok(self.query_conflicts(&sql, params![id]).await?.pop())
    }

    async fn open_for_operation(&self, operation_id: &OperationId) -> Result<Option<SyncConflict>> {
        let sql = format!(
            "SELECT {CONFLICT_COLUMNS} FROM sync_conflicts
             WHERE operation_id = ?1 AND status = 'open'
             ORDER BY id DESC
             LIMIT 1"
        );
        Ok(self
            .query_conflicts(&sql, params![operation_id.as_str()])
            .await?
            .pop())
    }

    async fn list(
        &self,
        status: Option<ConflictStatus>,
        org_id: Option<&str>,
        limit_rows: usize,
    ) -> Result<Vec<SyncConflict>> {
        let sql = format!(
            "SELECT {CONFLICT_COLUMNS} FROM sync_conflicts
             WHERE (?1 IS NULL OR status = ?1)
               AND (?2 IS NULL OR org_id = ?2)
             ORDER BY detected_at DESC, id DESC
             LIMIT ?3"
        );
        self.query_conflicts(
            &sql,
            params![
                text_or_null(status.map(ConflictStatus::as_str)),
                text_or_null(org_id),
                limit(limit_rows)
            ],
        )
        .await
    }

    async fn open_count(&self, org_id: Option<&str>) -> Result<i64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM sync_conflicts
                 WHERE status = 'open' AND (?1 IS NULL OR org_id = ?1)",
                params![text_or_null(org_id)],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(0),
        }
    }

    async fn mark_resolved(
        &self,
        id: i64,
        resolution: ConflictResolution,
        now: i64,
    ) -> Result<()> {
        let affected = self
            .conn
            .execute(
                "UPDATE sync_conflicts
                 SET status = 'resolved', resolution = ?1, resolved_at = ?2
                 WHERE id = ?3 AND status = 'open'",
                params![resolution.as_str(), now, id],
            )
            .await?;
        if affected > 0 {
            return Ok(());
        }
        match self.get(id).await? {
            None => Err(Error::NotFound(format!("conflict {id}"))),
            Some(_) => Err(Error::InvalidInput(format!(
                "conflict {id} is already resolved"
            ))),
        }
    }
}
