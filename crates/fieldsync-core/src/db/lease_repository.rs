//! Drain lease repository implementation

use libsql::{params, Connection};

use crate::error::Result;

/// Trait for the cross-process drain lease (async)
///
/// Only the lease holder may move outbox rows to `in_flight`, so any
/// in-flight row found by a fresh holder was orphaned by a crash.
#[allow(async_fn_in_trait)]
pub trait LeaseRepository {
    /// Take or extend the lease; false while another owner holds a live one
    async fn acquire(&self, owner: &str, expires_at: i64, now: i64) -> Result<bool>;

    /// Drop the lease if `owner` still holds it
    async fn release(&self, owner: &str) -> Result<()>;

    /// Owner of the live lease at `now`, if any
    async fn holder(&self, now: i64) -> Result<Option<String>>;
}

/// libSQL implementation of `LeaseRepository`
pub struct LibSqlLeaseRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlLeaseRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl LeaseRepository for LibSqlLeaseRepository<'_> {
    async fn acquire(&self, owner: &str, expires_at: i64, now: i64) -> Result<bool> {
        let affected = self
            .conn
            .execute(
                "INSERT INTO sync_lease (id, owner, expires_at) VALUES (1, ?1, ?2)
                 ON CONFLICT(id) DO UPDATE
                 SET owner = excluded.owner, expires_at = excluded.expires_at
                 WHERE sync_lease.owner = excluded.owner OR sync_lease.expires_at <= ?3",
                params![owner, expires_at, now],
            )
            .await?;
        Ok(affected > 0)
    }

    async fn release(&self, owner: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM sync_lease WHERE owner = ?1", params![owner])
            .await?;
        Ok(())
    }

    async fn holder(&self, now: i64) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT owner FROM sync_lease WHERE id = 1 AND expires_at > ?1",
                params![now],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }
}
