//! Database layer for fieldsync

mod conflict_repository;
mod connection;
mod lease_repository;
mod migrations;
mod outbox_repository;
mod values;

pub use conflict_repository::{ConflictRepository, LibSqlConflictRepository};
pub use connection::Database;
pub use lease_repository::{LeaseRepository, LibSqlLeaseRepository};
pub use outbox_repository::{LibSqlOutboxRepository, OutboxRepository};
