use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::MutationError;
use crate::model::Ticket;
use crate::observability;
use crate::occupancy::RoomOccupancy;

use super::RoomQueueBank;

/// Bounded wait on an empty queue between enqueue wakeups. The worker never
/// busy-spins: it parks on the room's Notify and this sleep is only the
/// backstop against a lost wakeup.
const IDLE_WAIT: Duration = Duration::from_millis(50);

/// Boundary to the status-mutation collaborator, which persists the
/// patient's queue-status transition. Called once per drained ticket from
/// an arbitrary worker task. Implementations must not reacquire the queue
/// or occupancy locks.
#[async_trait]
pub trait StatusMutator: Send + Sync {
    async fn advance_status(&self, ticket: &Ticket) -> Result<(), MutationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Starting = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl WorkerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => WorkerState::Starting,
            1 => WorkerState::Running,
            2 => WorkerState::Stopping,
            _ => WorkerState::Stopped,
        }
    }
}

/// One room's worker task: the room id, its cancellation token, and the
/// lifecycle flag. Owned by the bank's pool; one-to-one with a room.
pub struct RoomWorkerHandle {
    pub room: usize,
    state: Arc<AtomicU8>,
    cancel: CancellationToken,
    pub(super) join: JoinHandle<()>,
}

impl RoomWorkerHandle {
    pub(super) fn spawn(
        bank: Arc<RoomQueueBank>,
        room: usize,
        mutator: Arc<dyn StatusMutator>,
    ) -> Self {
        let state = Arc::new(AtomicU8::new(WorkerState::Starting as u8));
        let cancel = CancellationToken::new();
        metrics::gauge!(observability::WORKERS_RUNNING).increment(1.0);
        let join = tokio::spawn(run(bank, room, mutator, cancel.clone(), state.clone()));
        Self {
            room,
            state,
            cancel,
            join,
        }
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() == WorkerState::Running
    }

    /// Ask the worker to stop at its next loop boundary. An in-flight
    /// ticket is allowed to finish.
    pub(super) fn signal_stop(&self) {
        self.cancel.cancel();
    }

    /// Mark the worker stopped after its task has been joined or aborted.
    /// Decrements the running gauge exactly once even if the loop already
    /// recorded its own exit.
    pub(super) fn finish(&self) {
        finish_state(&self.state);
    }
}

fn finish_state(state: &AtomicU8) {
    let prev = state.swap(WorkerState::Stopped as u8, Ordering::AcqRel);
    if prev != WorkerState::Stopped as u8 {
        metrics::gauge!(observability::WORKERS_RUNNING).decrement(1.0);
    }
}

/// Clears the room's busy flag on drop, so occupancy stays correct even if
/// the mutation future is torn down mid-flight on a forced stop.
struct BusyGuard<'a> {
    occupancy: &'a RoomOccupancy,
    room: usize,
}

impl<'a> BusyGuard<'a> {
    fn hold(occupancy: &'a RoomOccupancy, room: usize) -> Self {
        // Spawned workers only exist for in-range rooms.
        let _ = occupancy.set_busy(room, true);
        metrics::gauge!(observability::ROOMS_BUSY).increment(1.0);
        Self { occupancy, room }
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let _ = self.occupancy.set_busy(self.room, false);
        metrics::gauge!(observability::ROOMS_BUSY).decrement(1.0);
    }
}

/// The per-room consumer loop: pull the head ticket, mark the room busy,
/// run the status mutation off every lock, mark the room idle, push a
/// snapshot, repeat. Per-ticket failures are isolated; the loop only exits
/// on cancellation.
async fn run(
    bank: Arc<RoomQueueBank>,
    room: usize,
    mutator: Arc<dyn StatusMutator>,
    cancel: CancellationToken,
    state: Arc<AtomicU8>,
) {
    state.store(WorkerState::Running as u8, Ordering::Release);
    debug!(tenant = %bank.tenant(), room, "room worker started");

    loop {
        if cancel.is_cancelled() {
            break;
        }
        let Some(ticket) = bank.take_next(room) else {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = bank.enqueue_signal(room).notified() => {}
                _ = tokio::time::sleep(IDLE_WAIT) => {}
            }
            continue;
        };
        process_one(&bank, room, mutator.as_ref(), ticket).await;
        // Room idle again — let waiting displays see it.
        bank.push_snapshot();
    }

    state.store(WorkerState::Stopping as u8, Ordering::Release);
    debug!(tenant = %bank.tenant(), room, "room worker stopped");
    finish_state(&state);
}

async fn process_one(
    bank: &RoomQueueBank,
    room: usize,
    mutator: &dyn StatusMutator,
    ticket: Ticket,
) {
    let busy = BusyGuard::hold(bank.occupancy(), room);
    // Dequeue and busy transition are visible; notify before the (possibly
    // slow) mutation so displays don't lag behind by one persistence call.
    bank.push_snapshot();

    let started = Instant::now();
    match mutator.advance_status(&ticket).await {
        Ok(()) => {
            metrics::counter!(observability::TICKETS_PROCESSED_TOTAL).increment(1);
            debug!(
                tenant = %bank.tenant(),
                room,
                patient = %ticket.patient_id,
                "ticket processed"
            );
        }
        Err(e) => {
            // At-most-once: the ticket is dropped, not requeued.
            metrics::counter!(observability::MUTATION_FAILURES_TOTAL).increment(1);
            warn!(
                tenant = %bank.tenant(),
                room,
                patient = %ticket.patient_id,
                "dropping ticket: {e}"
            );
        }
    }
    metrics::histogram!(observability::TICKET_PROCESS_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    drop(busy);
}
