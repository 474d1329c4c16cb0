use ulid::Ulid;

use crate::model::Ms;

#[derive(Debug)]
pub enum EngineError {
    /// Malformed input (bad window, zero capacity, over-long text).
    Validation(&'static str),
    /// Referenced entity absent, or not visible to the caller.
    NotFound(Ulid),
    /// Caller lacks rights over the resource.
    Authorization(&'static str),
    /// No resolvable staff owner for the order.
    Assignment(&'static str),
    /// The two assignment lookup paths disagree — a data-integrity fault,
    /// never resolved heuristically.
    AssignmentMismatch { assignment: Ulid, delivery: Ulid },
    /// Upstream fulfillment step not complete.
    Precondition(&'static str),
    /// Slot day does not come after the prerequisite completion instant.
    TemporalOrder { slot_day_start: Ms, completed_at: Ms },
    CapacityExceeded(u32),
    /// An active booking already holds this uniqueness key.
    DuplicateBooking(Ulid),
    /// Entity exists but is in the wrong state for the operation.
    InvalidState(&'static str),
    InvalidTransition { from: &'static str, to: &'static str },
    /// Write-once record already present with conflicting content.
    AlreadyExists(Ulid),
    LimitExceeded(&'static str),
    Wal(String),
}

impl EngineError {
    /// Stable snake_case code — the boundary's error envelope and the
    /// rejection metrics both key on this.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::NotFound(_) => "not_found",
            EngineError::Authorization(_) => "authorization",
            EngineError::Assignment(_) => "no_admin_assigned",
            EngineError::AssignmentMismatch { .. } => "assignment_mismatch",
            EngineError::Precondition(_) => "precondition_failed",
            EngineError::TemporalOrder { .. } => "temporal_order",
            EngineError::CapacityExceeded(_) => "capacity_exceeded",
            EngineError::DuplicateBooking(_) => "duplicate_booking",
            EngineError::InvalidState(_) => "invalid_state",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Wal(_) => "wal_error",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::Authorization(msg) => write!(f, "not permitted: {msg}"),
            EngineError::Assignment(msg) => write!(f, "assignment unresolved: {msg}"),
            EngineError::AssignmentMismatch {
                assignment,
                delivery,
            } => write!(
                f,
                "assignment record names admin {assignment} but delivery record names admin {delivery}"
            ),
            EngineError::Precondition(msg) => write!(f, "precondition failed: {msg}"),
            EngineError::TemporalOrder {
                slot_day_start,
                completed_at,
            } => write!(
                f,
                "slot day starting at {slot_day_start} is not after delivery completion at {completed_at}"
            ),
            EngineError::CapacityExceeded(cap) => {
                write!(f, "capacity {cap} exceeded: no free slots")
            }
            EngineError::DuplicateBooking(id) => {
                write!(f, "an active booking already exists: {id}")
            }
            EngineError::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            EngineError::InvalidTransition { from, to } => {
                write!(f, "illegal status transition: {from} -> {to}")
            }
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Wal(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
