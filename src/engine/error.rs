use ulid::Ulid;

use crate::model::RoomId;

#[derive(Debug)]
pub enum EngineError {
    /// Malformed interval (start ≥ end). Caller error, never retried.
    InvalidInterval(&'static str),
    /// Blank or oversized room identifier.
    InvalidRoomId(&'static str),
    /// Blank or oversized requester identity.
    InvalidRequester(&'static str),
    RoomNotFound(RoomId),
    /// The room exists but has been retired; no new reservations.
    RoomRetired(RoomId),
    RoomAlreadyExists(RoomId),
    /// Unknown reservation id.
    NotFound(Ulid),
    /// Requester does not own the reservation.
    Forbidden(Ulid),
    /// The requested interval overlaps this confirmed or held reservation.
    Conflict(Ulid),
    /// The hold lapsed before it was confirmed.
    HoldExpired(Ulid),
    /// The reservation was already cancelled; it can no longer be confirmed
    /// or rescheduled.
    NotActive(Ulid),
    /// Idempotency token reused with different parameters.
    TokenMismatch(String),
    /// The schedule's defensive re-check caught an overlap the coordinator
    /// should have prevented. Internal invariant breach — always fatal to the
    /// operation, surfaced for investigation, never swallowed.
    ConsistencyViolation { room_id: RoomId, conflicting: Ulid },
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidInterval(msg) => write!(f, "invalid interval: {msg}"),
            EngineError::InvalidRoomId(msg) => write!(f, "invalid room id: {msg}"),
            EngineError::InvalidRequester(msg) => write!(f, "invalid requester: {msg}"),
            EngineError::RoomNotFound(id) => write!(f, "room not found: {id}"),
            EngineError::RoomRetired(id) => write!(f, "room retired: {id}"),
            EngineError::RoomAlreadyExists(id) => write!(f, "room already exists: {id}"),
            EngineError::NotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::Forbidden(id) => {
                write!(f, "requester does not own reservation: {id}")
            }
            EngineError::Conflict(id) => write!(f, "conflict with reservation: {id}"),
            EngineError::HoldExpired(id) => write!(f, "hold expired: {id}"),
            EngineError::NotActive(id) => write!(f, "reservation no longer active: {id}"),
            EngineError::TokenMismatch(token) => {
                write!(f, "idempotency token reused with different parameters: {token}")
            }
            EngineError::ConsistencyViolation { room_id, conflicting } => write!(
                f,
                "internal consistency violation in room {room_id} involving reservation {conflicting}"
            ),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
