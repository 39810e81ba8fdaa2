use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{now_ms, validate_room_id, validate_span};
use super::windows::free_windows;
use super::{Engine, EngineError, SharedRoomSchedule};

impl Engine {
    /// Fetch a reservation record by id, including cancelled history.
    pub fn get(&self, id: &Ulid) -> Result<Reservation, EngineError> {
        self.reservation(id).ok_or(EngineError::NotFound(*id))
    }

    /// Active (pending or confirmed) reservations for a room, ordered by
    /// start time, optionally restricted to a `[start, end)` window.
    pub async fn list_for_room(
        &self,
        room_id: &str,
        window: Option<(Ms, Ms)>,
    ) -> Result<Vec<Reservation>, EngineError> {
        let key = validate_room_id(room_id)?;
        let query = match window {
            Some((start, end)) => Some(validate_query_window(start, end)?),
            None => None,
        };
        let room = self
            .get_room(key)
            .ok_or_else(|| EngineError::RoomNotFound(key.to_string()))?;
        let guard = room.read().await;
        debug!("list reservations. room_id='{key}'");

        let records = match query {
            Some(q) => guard
                .overlapping(&q)
                .filter_map(|e| self.reservation(&e.id))
                .collect(),
            None => guard
                .entries
                .iter()
                .filter_map(|e| self.reservation(&e.id))
                .collect(),
        };
        Ok(records)
    }

    /// All registered rooms, active and retired, sorted by id.
    pub async fn list_rooms(&self) -> Vec<RoomInfo> {
        let room_arcs: Vec<SharedRoomSchedule> =
            self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut infos = Vec::with_capacity(room_arcs.len());
        for room in room_arcs {
            let guard = room.read().await;
            infos.push(RoomInfo {
                id: guard.id.clone(),
                name: guard.name.clone(),
                capacity: guard.capacity,
                active: guard.active,
                reservations: guard.entries.len(),
            });
        }
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// First active room (by id) free for the whole interval, optionally
    /// filtered by minimum capacity.
    pub async fn find_available_room(
        &self,
        start: Ms,
        end: Ms,
        min_capacity: Option<u32>,
    ) -> Result<Option<RoomId>, EngineError> {
        let span = validate_span(start, end)?;
        debug!("find available room. interval=[{start}, {end})");

        let mut candidates: Vec<(RoomId, SharedRoomSchedule)> = self
            .rooms
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        candidates.sort_by(|a, b| a.0.cmp(&b.0));

        let now = now_ms();
        for (id, room) in candidates {
            let guard = room.read().await;
            if !guard.active {
                continue;
            }
            if let Some(min) = min_capacity
                && guard.capacity < min
            {
                continue;
            }
            if guard.first_conflict(&span, now, None).is_none() {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    /// Maximal free sub-spans of `[start, end)` in a room — the window minus
    /// every confirmed reservation and unlapsed hold.
    pub async fn free_windows(
        &self,
        room_id: &str,
        start: Ms,
        end: Ms,
    ) -> Result<Vec<Span>, EngineError> {
        let key = validate_room_id(room_id)?;
        let query = validate_query_window(start, end)?;
        let room = self
            .get_room(key)
            .ok_or_else(|| EngineError::RoomNotFound(key.to_string()))?;
        let guard = room.read().await;
        Ok(free_windows(&guard, &query, now_ms()))
    }
}

fn validate_query_window(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::InvalidInterval("start must be before end"));
    }
    if end - start > MAX_QUERY_WINDOW_MS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(Span::new(start, end))
}
