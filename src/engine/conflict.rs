use crate::limits::*;
use crate::model::{Ms, RoomSchedule, Span};

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Validate a requested interval: well-ordered, in-range, bounded width.
pub(crate) fn validate_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::InvalidInterval("start must be before end"));
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    let span = Span::new(start, end);
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("interval too wide"));
    }
    Ok(span)
}

/// Validate and normalize a caller-supplied room id (trimmed, non-empty).
pub(crate) fn validate_room_id(room_id: &str) -> Result<&str, EngineError> {
    let trimmed = room_id.trim();
    if trimmed.is_empty() {
        return Err(EngineError::InvalidRoomId("must not be blank"));
    }
    if trimmed.len() > MAX_ROOM_ID_LEN {
        return Err(EngineError::InvalidRoomId("too long"));
    }
    Ok(trimmed)
}

pub(crate) fn validate_requester(requester: &str) -> Result<(), EngineError> {
    if requester.trim().is_empty() {
        return Err(EngineError::InvalidRequester("must not be blank"));
    }
    if requester.len() > MAX_REQUESTER_LEN {
        return Err(EngineError::InvalidRequester("too long"));
    }
    Ok(())
}

/// The coordinator-side overlap check: any blocking entry (confirmed, or a
/// hold that has not lapsed by `now`) overlapping `span` is a conflict.
pub(crate) fn check_no_conflict(
    room: &RoomSchedule,
    span: &Span,
    now: Ms,
    exclude: Option<ulid::Ulid>,
) -> Result<(), EngineError> {
    match room.first_conflict(span, now, exclude) {
        Some(id) => {
            metrics::counter!(crate::observability::CONFLICTS_TOTAL).increment(1);
            Err(EngineError::Conflict(id))
        }
        None => Ok(()),
    }
}
