//! fieldsync-core - Core library for fieldsync
//!
//! This crate contains the durable outbox, the sync runtime that drains it to
//! a remote backend, conflict handling, and the status layer used by every
//! fieldsync client.

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SyncSettings;
pub use error::{Error, Result};
pub use models::{NewOperation, Operation, OperationId, OperationKind, OperationStatus, SyncConflict};
pub use services::SyncStore;
pub use state::{CycleResult, SyncPhase, SyncStatus, TriggerReason};
pub use sync::{
    HttpBackend, ObserverHandle, PushAck, PushError, RemoteBackend, Resolution, SyncRuntime,
    TriggerOutcome,
};
