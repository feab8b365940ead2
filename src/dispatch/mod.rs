mod worker;
#[cfg(test)]
mod tests;

pub use worker::{RoomWorkerHandle, StatusMutator, WorkerState};

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::error::DispatchError;
use crate::hub::QueueNotificationHub;
use crate::model::{QueueSnapshot, RoomStatus, Ticket};
use crate::observability;
use crate::occupancy::RoomOccupancy;

/// How long `stop_all_workers` waits for in-flight tickets before aborting
/// the remaining worker tasks.
const STOP_GRACE: Duration = Duration::from_secs(1);

/// One tenant's dispatcher: a FIFO queue per room slot behind a single
/// queue-wide lock, the room occupancy bitmap, the long-poll hub, and the
/// pool of room workers.
///
/// The queue lock is bank-wide rather than per-room: the least-loaded scan
/// and the enqueue it decides must be one critical section. Lock order: the
/// queue lock, the occupancy lock, and the hub registry lock are never held
/// simultaneously, and hub delivery always runs after both are released.
pub struct RoomQueueBank {
    tenant: String,
    queues: Mutex<Vec<VecDeque<Ticket>>>,
    /// One wakeup per room; enqueue nudges the room's worker out of its
    /// idle wait.
    wakeups: Vec<Notify>,
    occupancy: RoomOccupancy,
    hub: Arc<QueueNotificationHub>,
    workers: tokio::sync::Mutex<Vec<RoomWorkerHandle>>,
}

impl RoomQueueBank {
    pub fn new(tenant: impl Into<String>, room_capacity: usize) -> Self {
        assert!(room_capacity > 0, "room capacity must be positive");
        Self {
            tenant: tenant.into(),
            queues: Mutex::new(vec![VecDeque::new(); room_capacity]),
            wakeups: (0..room_capacity).map(|_| Notify::new()).collect(),
            occupancy: RoomOccupancy::new(room_capacity),
            hub: Arc::new(QueueNotificationHub::new()),
            workers: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn room_capacity(&self) -> usize {
        self.wakeups.len()
    }

    pub fn occupancy(&self) -> &RoomOccupancy {
        &self.occupancy
    }

    pub fn hub(&self) -> &Arc<QueueNotificationHub> {
        &self.hub
    }

    /// Admission entry point: pick the least-loaded room and enqueue there,
    /// atomically. Ties go to the lowest room index. Returns the chosen room.
    pub fn dispatch(&self, ticket: Ticket) -> usize {
        let room = {
            let mut queues = self.queues.lock().expect("queue lock poisoned");
            let room = least_loaded_of(&queues);
            queues[room].push_back(ticket);
            room
        };
        metrics::counter!(observability::TICKETS_DISPATCHED_TOTAL).increment(1);
        metrics::gauge!(observability::TICKETS_WAITING).increment(1.0);
        debug!(tenant = %self.tenant, room, "ticket dispatched");
        self.wakeups[room].notify_one();
        self.push_snapshot();
        room
    }

    /// Append a ticket to a specific room's queue. Prefer `dispatch` for
    /// admissions; this is the direct path for callers that already chose
    /// a room.
    pub fn enqueue(&self, room: usize, ticket: Ticket) -> Result<(), DispatchError> {
        {
            let mut queues = self.queues.lock().expect("queue lock poisoned");
            let queue = queues
                .get_mut(room)
                .ok_or(DispatchError::RoomOutOfRange {
                    room,
                    total: self.wakeups.len(),
                })?;
            queue.push_back(ticket);
        }
        metrics::gauge!(observability::TICKETS_WAITING).increment(1.0);
        debug!(tenant = %self.tenant, room, "ticket enqueued");
        self.wakeups[room].notify_one();
        self.push_snapshot();
        Ok(())
    }

    /// Room with the fewest queued tickets right now; ties resolve to the
    /// lowest index. Full scan under the queue lock.
    pub fn least_loaded_room(&self) -> usize {
        let queues = self.queues.lock().expect("queue lock poisoned");
        least_loaded_of(&queues)
    }

    /// Pop the head ticket of one room's queue. This is the workers' pull
    /// side; the bank stays the sole owner of the queues.
    pub(crate) fn take_next(&self, room: usize) -> Option<Ticket> {
        let ticket = {
            let mut queues = self.queues.lock().expect("queue lock poisoned");
            queues[room].pop_front()
        };
        if ticket.is_some() {
            metrics::gauge!(observability::TICKETS_WAITING).decrement(1.0);
        }
        ticket
    }

    pub(crate) fn enqueue_signal(&self, room: usize) -> &Notify {
        &self.wakeups[room]
    }

    pub fn queue_depths(&self) -> Vec<usize> {
        let queues = self.queues.lock().expect("queue lock poisoned");
        queues.iter().map(|q| q.len()).collect()
    }

    /// Assemble the current queue snapshot. Depths and busy flags are read
    /// under their own locks, one after the other, never nested.
    pub fn snapshot(&self) -> QueueSnapshot {
        let depths = self.queue_depths();
        let busy = self.occupancy.busy_flags();
        QueueSnapshot {
            rooms: depths
                .into_iter()
                .zip(busy)
                .enumerate()
                .map(|(room, (waiting, busy))| RoomStatus {
                    room,
                    waiting,
                    busy,
                })
                .collect(),
        }
    }

    /// Push the current snapshot to all pending long-poll listeners.
    /// Skipped entirely when nobody is waiting; never called with the
    /// queue or occupancy lock held.
    pub(crate) fn push_snapshot(&self) {
        if !self.hub.has_listeners() {
            return;
        }
        self.hub.notify_all(self.snapshot());
    }

    /// Start exactly one worker per room, each bound to its own queue.
    pub async fn start_workers(
        self: &Arc<Self>,
        mutator: Arc<dyn StatusMutator>,
    ) -> Result<(), DispatchError> {
        let mut workers = self.workers.lock().await;
        if !workers.is_empty() {
            return Err(DispatchError::WorkersAlreadyStarted);
        }
        for room in 0..self.room_capacity() {
            workers.push(RoomWorkerHandle::spawn(
                self.clone(),
                room,
                mutator.clone(),
            ));
        }
        info!(
            tenant = %self.tenant,
            rooms = self.room_capacity(),
            "worker pool started"
        );
        Ok(())
    }

    /// Signal every worker to stop at its next safe point, wait a bounded
    /// grace for in-flight tickets, then abort whatever is left. Queued and
    /// mid-flight tickets are discarded, never requeued. Idempotent.
    pub async fn stop_all_workers(&self) {
        let drained: Vec<RoomWorkerHandle> = {
            let mut workers = self.workers.lock().await;
            if workers.is_empty() {
                return;
            }
            for w in workers.iter() {
                w.signal_stop();
            }
            workers.drain(..).collect()
        };

        let deadline = tokio::time::Instant::now() + STOP_GRACE;
        for mut w in drained {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, &mut w.join).await.is_err() {
                warn!(tenant = %self.tenant, room = w.room, "worker stop grace elapsed, aborting");
                w.join.abort();
                // Completes once the task is actually torn down, so the
                // busy guard has run.
                let _ = (&mut w.join).await;
            }
            w.finish();
        }
        info!(tenant = %self.tenant, "worker pool stopped");
    }

    /// Lifecycle states of the current pool, indexed by room. Empty when no
    /// pool is running.
    pub async fn worker_states(&self) -> Vec<WorkerState> {
        self.workers.lock().await.iter().map(|w| w.state()).collect()
    }
}

fn least_loaded_of(queues: &[VecDeque<Ticket>]) -> usize {
    let mut best = 0;
    for (room, queue) in queues.iter().enumerate().skip(1) {
        if queue.len() < queues[best].len() {
            best = room;
        }
    }
    best
}
