//! Status fan-out to UI observers.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::state::SyncStatus;

const CHANNEL_CAPACITY: usize = 64;

/// Holds the latest `SyncStatus` and pushes every change to subscribers.
#[derive(Clone)]
pub struct StatusHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    current: watch::Sender<SyncStatus>,
    updates: broadcast::Sender<SyncStatus>,
}

impl Default for StatusHub {
    fn default() -> Self {
        Self::new(SyncStatus::default())
    }
}

impl StatusHub {
    pub fn new(initial: SyncStatus) -> Self {
        let (current, _) = watch::channel(initial);
        let (updates, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(HubInner { current, updates }),
        }
    }

    /// Latest published status. Never touches storage or the network.
    pub fn snapshot(&self) -> SyncStatus {
        self.inner.current.borrow().clone()
    }

    /// Replace the status and notify subscribers.
    pub fn publish(&self, status: SyncStatus) {
        self.update(|current| *current = status);
    }

    /// Edit the current status in place and notify subscribers.
    ///
    /// The edit and the broadcast happen under the watch lock, so concurrent
    /// updates never overwrite each other and subscribers see them in order.
    pub fn update(&self, edit: impl FnOnce(&mut SyncStatus)) -> SyncStatus {
        let mut next = SyncStatus::default();
        self.inner.current.send_modify(|current| {
            edit(current);
            next = current.clone();
            // No receivers is fine.
            let _ = self.inner.updates.send(current.clone());
        });
        next
    }

    /// Typed stream of status changes. Dropping it unsubscribes.
    pub fn subscribe(&self) -> StatusSubscription {
        StatusSubscription {
            receiver: self.inner.updates.subscribe(),
        }
    }

    /// Call `callback` with the current status, then on every change.
    ///
    /// Must be called inside a Tokio runtime. Delivery stops when the
    /// returned guard is dropped or unsubscribed.
    pub fn subscribe_with<F>(&self, callback: F) -> Unsubscribe
    where
        F: Fn(SyncStatus) + Send + 'static,
    {
        let mut subscription = self.subscribe();
        let initial = self.snapshot();
        let task = tokio::spawn(async move {
            callback(initial);
            while let Some(status) = subscription.recv().await {
                callback(status);
            }
        });
        Unsubscribe { task: Some(task) }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.updates.receiver_count()
    }
}

/// Receiving end of [`StatusHub::subscribe`].
pub struct StatusSubscription {
    receiver: broadcast::Receiver<SyncStatus>,
}

impl StatusSubscription {
    /// Next status change, or `None` once the hub is gone.
    ///
    /// A slow subscriber skips intermediate states and resumes from the
    /// oldest one still buffered.
    pub async fn recv(&mut self) -> Option<SyncStatus> {
        loop {
            match self.receiver.recv().await {
                Ok(status) => return Some(status),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("Status subscriber skipped {skipped} updates");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Guard for a callback subscription.
pub struct Unsubscribe {
    task: Option<JoinHandle<()>>,
}

impl Unsubscribe {
    pub fn unsubscribe(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        self.stop();
    }
}
