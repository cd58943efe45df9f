//! Outbox draining, conflict handling, and status fan-out.

mod backend;
mod backoff;
mod conflict;
mod runtime;
mod status;


pub use backend::{classify_response, HttpBackend, PushAck, PushError, RemoteBackend};
pub use backoff::RetryPolicy;
pub use conflict::{ConflictDetector, ConflictResolver, Resolution};
pub use runtime::{ObserverHandle, SkipReason, SyncRuntime, TriggerOutcome};
pub use status::{StatusHub, StatusSubscription, Unsubscribe};
