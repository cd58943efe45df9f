//! Sync runtime: drains the outbox to the backend and publishes status.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::SyncSettings;
use crate::models::{NewOperation, Operation, SyncConflict};
use crate::services::SyncStore;
use crate::state::{CycleResult, SyncPhase, SyncStatus, TriggerReason};
use crate::Result;

use super::backend::{PushError, RemoteBackend};
use super::conflict::{ConflictDetector, ConflictResolver, Resolution};
use super::status::{StatusHub, StatusSubscription};

/// What happened to a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// One or more drain cycles ran; counters are summed
    Ran(CycleResult),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another cycle holds the runtime
    AlreadySyncing,
    /// The runtime is in the error phase and only a manual trigger resumes it
    AwaitingManualRetry,
    /// Another runtime, possibly in another process, holds the drain lease
    LeaseHeld,
}

/// Lifetime of the drain lease; renewed before every push.
const LEASE_TTL: Duration = Duration::from_secs(120);

/// Why a drain stopped before the end of its batch
enum Halt {
    Offline(String),
    Session(String),
}

struct Drain {
    result: CycleResult,
    halt: Option<Halt>,
    more_due: bool,
}

#[derive(Default)]
struct Lifecycle {
    observers: usize,
    scheduler: Option<Scheduler>,
}

struct Scheduler {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct RuntimeInner {
    /// Lease owner identity, unique per runtime instance
    owner: String,
    store: SyncStore,
    backend: Arc<dyn RemoteBackend>,
    detector: ConflictDetector,
    resolver: ConflictResolver,
    hub: StatusHub,
    batch_size: usize,
    interval: Duration,
    cycle: tokio::sync::Mutex<()>,
    /// Orders count reads with the status writes that publish them
    publish: tokio::sync::Mutex<()>,
    wake: Notify,
    lifecycle: Mutex<Lifecycle>,
}

/// Cloneable handle to one sync engine instance.
#[derive(Clone)]
pub struct SyncRuntime {
    inner: Arc<RuntimeInner>,
}

impl SyncRuntime {
    pub fn new(
        store: SyncStore,
        backend: Arc<dyn RemoteBackend>,
        settings: &SyncSettings,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            inner: Arc::new(RuntimeInner {
                owner: Uuid::now_v7().to_string(),
                detector: ConflictDetector::new(store.clone()),
                resolver: ConflictResolver::new(store.clone()),
                store,
                backend,
                hub: StatusHub::default(),
                batch_size: settings.batch_size,
                interval: settings.interval(),
                cycle: tokio::sync::Mutex::new(()),
                publish: tokio::sync::Mutex::new(()),
                wake: Notify::new(),
                lifecycle: Mutex::new(Lifecycle::default()),
            }),
        })
    }

    pub fn store(&self) -> &SyncStore {
        &self.inner.store
    }

    pub fn hub(&self) -> &StatusHub {
        &self.inner.hub
    }

    pub fn detector(&self) -> &ConflictDetector {
        &self.inner.detector
    }

    /// Latest published status.
    pub fn status(&self) -> SyncStatus {
        self.inner.hub.snapshot()
    }

    pub fn subscribe(&self) -> StatusSubscription {
        self.inner.hub.subscribe()
    }

    /// Start the background scheduler (if needed) and register an observer.
    ///
    /// The scheduler runs an `AppStart` cycle, then keeps draining on the
    /// configured interval and whenever a retry comes due. It stops once
    /// every returned handle is dropped. Must be called inside a Tokio
    /// runtime.
    pub fn start(&self) -> ObserverHandle {
        let mut lifecycle = self.lifecycle();
        lifecycle.observers += 1;

        let running = lifecycle
            .scheduler
            .as_ref()
            .is_some_and(|scheduler| !scheduler.task.is_finished());
        if !running {
            let (shutdown, shutdown_rx) = watch::channel(false);
            let task = tokio::spawn(scheduler_loop(self.clone(), shutdown_rx));
            lifecycle.scheduler = Some(Scheduler { shutdown, task });
            tracing::debug!("Sync scheduler started");
        }

        ObserverHandle {
            runtime: self.clone(),
        }
    }

    /// Whether the background scheduler is active.
    pub fn is_running(&self) -> bool {
        self.lifecycle().scheduler.is_some()
    }

    /// Stop the scheduler and wait for it to finish its current cycle.
    pub async fn teardown(&self) {
        let scheduler = {
            let mut lifecycle = self.lifecycle();
            lifecycle.observers = 0;
            lifecycle.scheduler.take()
        };
        if let Some(scheduler) = scheduler {
            scheduler.shutdown.send_replace(true);
            if let Err(error) = scheduler.task.await {
                tracing::warn!("Sync scheduler ended abnormally: {error}");
            }
            tracing::debug!("Sync scheduler stopped");
        }
    }

    pub async fn app_resumed(&self) -> Result<TriggerOutcome> {
        self.trigger(TriggerReason::AppResumed).await
    }

    pub async fn network_resumed(&self) -> Result<TriggerOutcome> {
        self.trigger(TriggerReason::NetworkResumed).await
    }

    /// Record a mutation and let the scheduler know there is work.
    pub async fn enqueue(&self, draft: NewOperation) -> Result<Operation> {
        let operation = self.inner.store.create(draft).await?;
        self.refresh_queue_depth().await?;
        self.inner.wake.notify_one();
        Ok(operation)
    }

    /// Drain the outbox now.
    ///
    /// Skipped while another cycle runs, while another runtime on the same
    /// database holds the drain lease, and in the error phase unless the
    /// reason is `Manual`. Keeps cycling while the runtime stays idle and
    /// operations are still due.
    pub async fn trigger(&self, reason: TriggerReason) -> Result<TriggerOutcome> {
        let Ok(_cycle) = self.inner.cycle.try_lock() else {
            tracing::debug!("Trigger {reason} skipped: cycle already running");
            return Ok(TriggerOutcome::Skipped(SkipReason::AlreadySyncing));
        };
        if self.status().phase == SyncPhase::Error && reason != TriggerReason::Manual {
            tracing::debug!("Trigger {reason} skipped: waiting for manual retry");
            return Ok(TriggerOutcome::Skipped(SkipReason::AwaitingManualRetry));
        }

        if !self
            .inner
            .store
            .acquire_sync_lease(&self.inner.owner, LEASE_TTL)
            .await?
        {
            tracing::debug!("Trigger {reason} skipped: drain lease held elsewhere");
            return Ok(TriggerOutcome::Skipped(SkipReason::LeaseHeld));
        }

        let drained = self.drain_until_settled(reason).await;
        if let Err(error) = self.inner.store.release_sync_lease(&self.inner.owner).await {
            tracing::warn!("Cannot release drain lease: {error}");
        }
        drained.map(TriggerOutcome::Ran)
    }

    async fn drain_until_settled(&self, reason: TriggerReason) -> Result<CycleResult> {
        let mut total = CycleResult::default();
        loop {
            let drain = self.run_cycle(reason).await?;
            total.pushed += drain.result.pushed;
            total.failed += drain.result.failed;
            total.dead += drain.result.dead;
            total.conflicts += drain.result.conflicts;

            if drain.halt.is_some() || !drain.more_due || drain.result.attempted() == 0 {
                break;
            }
        }
        Ok(total)
    }

    /// Re-read the aggregates from the store and publish them.
    pub async fn refresh_queue_depth(&self) -> Result<SyncStatus> {
        self.publish_counts(|_| {}).await
    }

    /// Move every dead operation back into the queue.
    pub async fn retry_all_dead_operations(&self) -> Result<u64> {
        let revived = self.inner.store.retry_all_dead_operations().await?;
        if revived > 0 {
            tracing::info!("Replaying {revived} dead operations");
            self.inner.wake.notify_one();
        }
        self.refresh_queue_depth().await?;
        Ok(revived)
    }

    /// Apply a human decision to an open conflict.
    pub async fn resolve_conflict(
        &self,
        conflict_id: i64,
        resolution: Resolution,
    ) -> Result<SyncConflict> {
        let conflict = self.inner.resolver.resolve(conflict_id, resolution).await?;
        self.refresh_queue_depth().await?;
        self.inner.wake.notify_one();
        Ok(conflict)
    }

    async fn run_cycle(&self, reason: TriggerReason) -> Result<Drain> {
        self.inner.hub.update(|status| {
            status.phase = SyncPhase::Syncing;
            status.last_trigger = Some(reason);
        });

        let drain = match self.drain().await {
            Ok(drain) => drain,
            Err(error) => {
                tracing::error!("Sync cycle ({reason}) failed: {error}");
                let message = error.to_string();
                self.inner.hub.update(|status| {
                    status.phase = SyncPhase::Error;
                    status.last_error = Some(message);
                });
                return Err(error);
            }
        };

        let finished_at = self.inner.store.now_ms();
        let (phase, last_error) = match &drain.halt {
            None => (SyncPhase::Idle, None),
            Some(Halt::Offline(message)) => (SyncPhase::Offline, Some(message.clone())),
            Some(Halt::Session(message)) => (SyncPhase::Error, Some(message.clone())),
        };
        let clean = phase == SyncPhase::Idle && drain.result.failed == 0 && drain.result.dead == 0;
        let result = drain.result;

        let published = self
            .publish_counts(move |status| {
                status.phase = phase;
                status.last_error = last_error;
                status.last_result = Some(result);
                if clean {
                    status.last_synced_at = Some(finished_at);
                }
            })
            .await;
        if let Err(error) = published {
            let message = error.to_string();
            self.inner.hub.update(|status| {
                status.phase = SyncPhase::Error;
                status.last_error = Some(message);
            });
            return Err(error);
        }

        tracing::info!(
            "Sync cycle ({reason}) finished {phase}: pushed={} failed={} dead={} conflicts={}",
            result.pushed,
            result.failed,
            result.dead,
            result.conflicts
        );
        Ok(drain)
    }

    async fn drain(&self) -> Result<Drain> {
        let store = &self.inner.store;

        // The lease is ours, so any in-flight row belongs to a holder that is gone.
        let recovered = store.recover_in_flight().await?;
        if recovered > 0 {
            tracing::warn!("Recovered {recovered} operations left in flight");
        }

        let batch = store.next_batch(self.inner.batch_size, store.now_ms()).await?;
        let mut result = CycleResult::default();
        let mut blocked = HashSet::new();

        for operation in batch {
            if blocked.contains(&operation.entity_key()) {
                continue;
            }

            if !store
                .acquire_sync_lease(&self.inner.owner, LEASE_TTL)
                .await?
            {
                tracing::warn!("Drain lease lost, ending cycle early");
                return Ok(Drain {
                    result,
                    halt: None,
                    more_due: false,
                });
            }
            store.mark_in_flight(&operation.id).await?;
            tracing::debug!(
                "Pushing {} {} {}/{} (attempt {})",
                operation.id,
                operation.kind,
                operation.entity,
                operation.entity_id,
                operation.retry_count + 1
            );

            let error = match self.inner.backend.push(&operation).await {
                Ok(_) => {
                    store.mark_done(&operation.id).await?;
                    result.pushed += 1;
                    continue;
                }
                Err(error) => error,
            };
            blocked.insert(operation.entity_key());
            let message = error.to_string();

            if error.is_connectivity() {
                tracing::warn!("Backend unreachable, going offline: {message}");
                store.release(&operation.id, &message).await?;
                return Ok(Drain {
                    result,
                    halt: Some(Halt::Offline(message)),
                    more_due: false,
                });
            }
            if error.is_session_wide() {
                tracing::warn!("Session rejected by backend: {message}");
                store.release(&operation.id, &message).await?;
                return Ok(Drain {
                    result,
                    halt: Some(Halt::Session(message)),
                    more_due: false,
                });
            }

            match &error {
                PushError::Rejected(_) => {
                    tracing::warn!("Operation {} rejected: {message}", operation.id);
                    store.mark_dead(&operation.id, &message).await?;
                    result.dead += 1;
                }
                PushError::Conflict { .. } => {
                    if self.inner.detector.detect(&operation, &error).await?.is_some() {
                        result.conflicts += 1;
                    }
                    self.fail(&operation, &message, &mut result).await?;
                }
                _ => self.fail(&operation, &message, &mut result).await?,
            }
        }

        let more_due = !store.next_batch(1, store.now_ms()).await?.is_empty();
        Ok(Drain {
            result,
            halt: None,
            more_due,
        })
    }

    async fn fail(
        &self,
        operation: &Operation,
        message: &str,
        result: &mut CycleResult,
    ) -> Result<()> {
        let store = &self.inner.store;
        let failures = u32::try_from(operation.retry_count.saturating_add(1)).unwrap_or(u32::MAX);
        if store.retry_policy().is_exhausted(failures) {
            tracing::warn!(
                "Operation {} dead after {failures} failures: {message}",
                operation.id
            );
            store.mark_dead(&operation.id, message).await?;
            result.dead += 1;
        } else {
            let failed = store.mark_failed(&operation.id, message).await?;
            tracing::debug!(
                "Operation {} failed ({failures}), next attempt at {}",
                operation.id,
                failed.next_attempt_at
            );
            result.failed += 1;
        }
        Ok(())
    }

    async fn publish_counts(
        &self,
        edit: impl FnOnce(&mut SyncStatus),
    ) -> Result<SyncStatus> {
        let store = &self.inner.store;
        let _publishing = self.inner.publish.lock().await;
        let queue_depth = store.count_pending_operations().await?;
        let dead_letter_count = store.count_dead_operations().await?;
        let open_conflict_count = store.open_conflict_count(None).await?;
        let pending_uploads = store.count_pending_uploads().await?;

        Ok(self.inner.hub.update(|status| {
            status.queue_depth = queue_depth;
            status.dead_letter_count = dead_letter_count;
            status.open_conflict_count = open_conflict_count;
            status.pending_uploads = pending_uploads;
            edit(status);
        }))
    }

    /// How long the scheduler may sleep before the next useful cycle.
    async fn next_wake_delay(&self) -> Duration {
        let store = &self.inner.store;
        let interval = self.inner.interval;
        let now = store.now_ms();

        if self.status().phase == SyncPhase::Idle {
            match store.next_batch(1, now).await {
                Ok(batch) if !batch.is_empty() => return Duration::ZERO,
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!("Cannot read outbox schedule: {error}");
                    return interval;
                }
            }
        }

        match store.next_due_after(now).await {
            Ok(Some(due)) => {
                let wait = u64::try_from(due.saturating_sub(now)).unwrap_or(0);
                interval.min(Duration::from_millis(wait))
            }
            Ok(None) => interval,
            Err(error) => {
                tracing::warn!("Cannot read outbox schedule: {error}");
                interval
            }
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.inner
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn release_observer(&self) {
        let mut lifecycle = self.lifecycle();
        lifecycle.observers = lifecycle.observers.saturating_sub(1);
        if lifecycle.observers == 0 {
            if let Some(scheduler) = lifecycle.scheduler.take() {
                scheduler.shutdown.send_replace(true);
                tracing::debug!("Last observer gone, stopping sync scheduler");
            }
        }
    }
}

async fn scheduler_loop(runtime: SyncRuntime, mut shutdown: watch::Receiver<bool>) {
    let mut reason = Some(TriggerReason::AppStart);
    loop {
        if *shutdown.borrow() {
            break;
        }
        if let Some(reason) = reason.take() {
            if let Err(error) = runtime.trigger(reason).await {
                tracing::warn!("Scheduled sync ({reason}) failed: {error}");
            }
        }

        let delay = runtime.next_wake_delay().await;
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            // Work was added; recompute the delay before running anything.
            () = runtime.inner.wake.notified() => {}
            () = tokio::time::sleep(delay) => reason = Some(TriggerReason::Interval),
        }
    }
}

/// Keeps the scheduler alive while held.
pub struct ObserverHandle {
    runtime: SyncRuntime,
}

impl ObserverHandle {
    pub fn status(&self) -> SyncStatus {
        self.runtime.status()
    }

    pub fn subscribe(&self) -> StatusSubscription {
        self.runtime.subscribe()
    }
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        self.runtime.release_observer();
    }
}
