use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// One patient's place in a room's waiting queue. Immutable once enqueued;
/// ownership moves from the admitting caller to the room queue, then to the
/// room worker that drains it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub patient_id: Ulid,
    pub queue_id: Ulid,
}

impl Ticket {
    pub fn new(patient_id: Ulid, queue_id: Ulid) -> Self {
        Self {
            patient_id,
            queue_id,
        }
    }
}

/// Observable state of one room at snapshot time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomStatus {
    pub room: usize,
    /// Tickets currently waiting in this room's queue.
    pub waiting: usize,
    /// Whether the room's worker is processing a ticket right now.
    pub busy: bool,
}

/// Point-in-time view of the whole dispatcher, delivered to long-poll
/// listeners on every queue mutation. Queue depths and busy flags are each
/// read under their own lock; the two reads are not a single atomic cut.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub rooms: Vec<RoomStatus>,
}

impl QueueSnapshot {
    pub fn total_waiting(&self) -> usize {
        self.rooms.iter().map(|r| r.waiting).sum()
    }

    pub fn idle_rooms(&self) -> usize {
        self.rooms.iter().filter(|r| !r.busy).count()
    }

    /// JSON payload for the long-poll transport layer.
    pub fn to_payload(&self) -> String {
        serde_json::to_string(self).expect("snapshot serialization cannot fail")
    }
}
