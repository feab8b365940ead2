use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::model::QueueSnapshot;
use crate::observability;

/// Registry of suspended long-poll requests. Each registered listener is
/// resolved exactly once: with a snapshot when a queue mutation fires
/// `notify_all`, or with no update when its deadline elapses first. The
/// registry entry is the resolution token — whichever side removes it wins,
/// the other side observes it gone and does nothing.
///
/// The registry lock is independent of the queue and occupancy locks and is
/// never held while delivering: `notify_all` swaps the listener set for an
/// empty one under the lock, then resolves the drained set outside it.
pub struct QueueNotificationHub {
    listeners: Mutex<HashMap<u64, oneshot::Sender<QueueSnapshot>>>,
    next_id: AtomicU64,
}

impl QueueNotificationHub {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Suspend one long-poll request. The caller awaits the returned handle;
    /// it resolves with `Some(snapshot)` on the next notification or `None`
    /// once `timeout` elapses.
    pub fn register(self: &Arc<Self>, timeout: Duration) -> PendingUpdate {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut listeners = self.listeners.lock().expect("hub lock poisoned");
            listeners.insert(id, tx);
        }
        metrics::gauge!(observability::LISTENERS_ACTIVE).increment(1.0);
        PendingUpdate {
            id,
            timeout,
            rx: Some(rx),
            hub: self.clone(),
        }
    }

    /// Resolve every currently registered listener with `snapshot` and clear
    /// the registry. Listeners registered after the swap wait for the next
    /// notification.
    pub fn notify_all(&self, snapshot: QueueSnapshot) {
        let drained = {
            let mut listeners = self.listeners.lock().expect("hub lock poisoned");
            std::mem::take(&mut *listeners)
        };
        if drained.is_empty() {
            return;
        }
        metrics::gauge!(observability::LISTENERS_ACTIVE).decrement(drained.len() as f64);
        metrics::counter!(observability::NOTIFICATIONS_TOTAL).increment(drained.len() as u64);
        for (_, tx) in drained {
            // Send fails only if the listener gave up (timed out or dropped)
            // between the swap and here.
            let _ = tx.send(snapshot.clone());
        }
    }

    /// Non-blocking check used to skip snapshot assembly when nobody waits.
    pub fn has_listeners(&self) -> bool {
        !self.listeners.lock().expect("hub lock poisoned").is_empty()
    }

    /// Remove a listener from the registry. Returns true if it was still
    /// registered, i.e. the caller won the resolution race.
    fn forget(&self, id: u64) -> bool {
        let removed = {
            let mut listeners = self.listeners.lock().expect("hub lock poisoned");
            listeners.remove(&id).is_some()
        };
        if removed {
            metrics::gauge!(observability::LISTENERS_ACTIVE).decrement(1.0);
        }
        removed
    }
}

impl Default for QueueNotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for one suspended long-poll request. Dropping it without awaiting
/// (client disconnect) deregisters the listener.
pub struct PendingUpdate {
    id: u64,
    timeout: Duration,
    rx: Option<oneshot::Receiver<QueueSnapshot>>,
    hub: Arc<QueueNotificationHub>,
}

impl PendingUpdate {
    /// Await resolution: `Some(snapshot)` if a notification arrived before
    /// the deadline, `None` otherwise.
    pub async fn wait(mut self) -> Option<QueueSnapshot> {
        let mut rx = self.rx.take().expect("wait consumes the handle");
        match tokio::time::timeout(self.timeout, &mut rx).await {
            Ok(Ok(snapshot)) => Some(snapshot),
            // Sender dropped without a send: the hub was dropped or the
            // listener was forgotten — treat as no update.
            Ok(Err(_)) => None,
            Err(_elapsed) => {
                if self.hub.forget(self.id) {
                    // Timeout won the race.
                    None
                } else {
                    // A concurrent notify_all already claimed this listener;
                    // its snapshot is in flight on the channel.
                    rx.await.ok()
                }
            }
        }
    }
}

impl Drop for PendingUpdate {
    fn drop(&mut self) {
        self.hub.forget(self.id);
    }
}
