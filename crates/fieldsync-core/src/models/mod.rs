//! Data models for fieldsync

mod operation;
mod sync_conflict;

pub use operation::{NewOperation, Operation, OperationId, OperationKind, OperationStatus};
pub use sync_conflict::{ConflictResolution, ConflictStatus, SyncConflict};
