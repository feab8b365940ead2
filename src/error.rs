#[derive(Debug, PartialEq, Eq)]
pub enum DispatchError {
    /// Room id outside `[0, total)` — a programmer error, never retried.
    RoomOutOfRange { room: usize, total: usize },
    /// `start_workers` called on a bank whose pool is already running.
    WorkersAlreadyStarted,
    InvalidTenantName(&'static str),
    LimitExceeded(&'static str),
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::RoomOutOfRange { room, total } => {
                write!(f, "room {room} out of range (capacity {total})")
            }
            DispatchError::WorkersAlreadyStarted => {
                write!(f, "worker pool already started")
            }
            DispatchError::InvalidTenantName(msg) => write!(f, "invalid tenant name: {msg}"),
            DispatchError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for DispatchError {}

/// The status-mutation collaborator failed for one ticket. Logged, counted,
/// and the ticket is dropped; the worker loop continues with the next one.
#[derive(Debug)]
pub struct MutationError {
    pub reason: String,
}

impl MutationError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for MutationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "status mutation failed: {}", self.reason)
    }
}

impl std::error::Error for MutationError {}
