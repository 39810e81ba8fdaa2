use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;
use ulid::Ulid;

use crate::idempotency::TokenHit;
use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, now_ms, validate_requester, validate_room_id, validate_span};
use super::{Engine, EngineError};

impl Engine {
    /// Register a bookable room. Ids are trimmed; re-registering an existing
    /// id is an error.
    pub async fn add_room(
        &self,
        room_id: &str,
        name: Option<String>,
        capacity: u32,
    ) -> Result<(), EngineError> {
        let key = validate_room_id(room_id)?;
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("room name too long"));
        }
        if capacity == 0 {
            return Err(EngineError::LimitExceeded("room capacity must be positive"));
        }
        if self.rooms.len() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if self.rooms.contains_key(key) {
            return Err(EngineError::RoomAlreadyExists(key.to_string()));
        }

        let event = Event::RoomAdded {
            id: key.to_string(),
            name: name.clone(),
            capacity,
        };
        // Room becomes visible only after its event is durable, so no
        // reservation event can precede it in the log.
        self.wal_append(&event).await?;
        let room = RoomSchedule::new(key.to_string(), name, capacity);
        use dashmap::mapref::entry::Entry;
        match self.rooms.entry(key.to_string()) {
            Entry::Vacant(v) => {
                v.insert(Arc::new(RwLock::new(room)));
            }
            // Lost a race with a concurrent registration of the same id.
            Entry::Occupied(_) => return Err(EngineError::RoomAlreadyExists(key.to_string())),
        }
        metrics::gauge!(crate::observability::ROOMS).set(self.rooms.len() as f64);
        self.notify.send(key, &event);
        info!("room added. room_id='{key}'");
        Ok(())
    }

    /// Retire a room: existing reservations and history stay, new ones are
    /// rejected. Idempotent.
    pub async fn retire_room(&self, room_id: &str) -> Result<(), EngineError> {
        let key = validate_room_id(room_id)?;
        let room = self
            .get_room(key)
            .ok_or_else(|| EngineError::RoomNotFound(key.to_string()))?;
        let mut guard = room.write().await;
        if !guard.active {
            return Ok(());
        }
        let event = Event::RoomRetired { id: key.to_string() };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("room retired. room_id='{key}'");
        Ok(())
    }

    /// Book a room for `[start, end)`, committing a Confirmed reservation.
    ///
    /// The whole check-then-commit sequence runs under the room's write lock:
    /// overlap re-validation, the WAL append (commit point), and the schedule
    /// insert. Distinct rooms never contend.
    ///
    /// A client-supplied `token` makes the call idempotent: a retry with the
    /// same token and parameters returns the original reservation instead of
    /// re-running the protocol.
    pub async fn book(
        &self,
        room_id: &str,
        start: Ms,
        end: Ms,
        requester: &str,
        token: Option<&str>,
    ) -> Result<Reservation, EngineError> {
        let key = validate_room_id(room_id)?;
        validate_requester(requester)?;
        let span = validate_span(start, end)?;
        if let Some(t) = token
            && t.len() > MAX_TOKEN_LEN
        {
            return Err(EngineError::LimitExceeded("idempotency token too long"));
        }

        if let Some(t) = token
            && let Some(hit) = self.tokens.lookup(t, key, &span, requester, now_ms())
        {
            return self.replay_token(t, hit);
        }

        let room = self
            .get_room(key)
            .ok_or_else(|| EngineError::RoomNotFound(key.to_string()))?;
        let mut guard = room.write().await;
        if !guard.active {
            return Err(EngineError::RoomRetired(key.to_string()));
        }
        if guard.entries.len() >= MAX_RESERVATIONS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many reservations in room"));
        }

        let now = now_ms();
        // Re-check the token under the lock so two concurrent retries of the
        // same request collapse instead of one of them hitting Conflict.
        if let Some(t) = token
            && let Some(hit) = self.tokens.lookup(t, key, &span, requester, now)
        {
            return self.replay_token(t, hit);
        }

        if let Err(e) = check_no_conflict(&guard, &span, now, None) {
            if let EngineError::Conflict(other) = &e {
                info!("booking conflict. room_id='{key}', interval=[{start}, {end}), conflicting={other}");
            }
            return Err(e);
        }

        let id = Ulid::new();
        let event = Event::Booked {
            id,
            room_id: key.to_string(),
            span,
            requester: requester.to_string(),
        };
        self.commit_entry(
            &mut guard,
            event,
            ScheduleEntry {
                id,
                span,
                kind: EntryKind::Confirmed,
            },
        )
        .await?;

        if let Some(t) = token {
            self.tokens.record(t, key, span, requester, id, now);
        }
        metrics::counter!(crate::observability::BOOKINGS_TOTAL).increment(1);
        info!("booking confirmed. room_id='{key}', reservation={id}, interval=[{start}, {end})");
        self.reservation(&id).ok_or(EngineError::NotFound(id))
    }

    /// Place a pending hold: blocks the interval like a booking until it is
    /// confirmed, cancelled, or lapses `ttl_ms` from now.
    pub async fn hold(
        &self,
        room_id: &str,
        start: Ms,
        end: Ms,
        requester: &str,
        ttl_ms: Ms,
    ) -> Result<Reservation, EngineError> {
        let key = validate_room_id(room_id)?;
        validate_requester(requester)?;
        let span = validate_span(start, end)?;
        if ttl_ms <= 0 || ttl_ms > MAX_HOLD_TTL_MS {
            return Err(EngineError::LimitExceeded("hold ttl out of range"));
        }

        let room = self
            .get_room(key)
            .ok_or_else(|| EngineError::RoomNotFound(key.to_string()))?;
        let mut guard = room.write().await;
        if !guard.active {
            return Err(EngineError::RoomRetired(key.to_string()));
        }
        if guard.entries.len() >= MAX_RESERVATIONS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many reservations in room"));
        }

        let now = now_ms();
        check_no_conflict(&guard, &span, now, None)?;

        let id = Ulid::new();
        let expires_at = now + ttl_ms;
        let event = Event::HoldPlaced {
            id,
            room_id: key.to_string(),
            span,
            requester: requester.to_string(),
            expires_at,
        };
        self.commit_entry(
            &mut guard,
            event,
            ScheduleEntry {
                id,
                span,
                kind: EntryKind::Held { expires_at },
            },
        )
        .await?;

        metrics::counter!(crate::observability::HOLDS_PLACED_TOTAL).increment(1);
        info!("hold placed. room_id='{key}', reservation={id}, expires_at={expires_at}");
        self.reservation(&id).ok_or(EngineError::NotFound(id))
    }

    /// Promote a pending hold to a confirmed reservation.
    pub async fn confirm(&self, id: Ulid, requester: &str) -> Result<Reservation, EngineError> {
        validate_requester(requester)?;
        let (record, mut guard) = self.resolve_reservation_write(&id).await?;
        if record.requester != requester {
            return Err(EngineError::Forbidden(id));
        }
        match record.status {
            // Confirming twice is a no-op, mirroring idempotent cancel.
            ReservationStatus::Confirmed => return Ok(record),
            ReservationStatus::Cancelled => return Err(EngineError::NotActive(id)),
            ReservationStatus::Pending => {}
        }
        if record.expires_at.is_some_and(|t| t <= now_ms()) {
            return Err(EngineError::HoldExpired(id));
        }

        let event = Event::HoldConfirmed {
            id,
            room_id: record.room_id.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_TOTAL).increment(1);
        info!("hold confirmed. room_id='{}', reservation={id}", record.room_id);
        self.reservation(&id).ok_or(EngineError::NotFound(id))
    }

    /// Cancel a reservation (pending or confirmed). Only the original
    /// requester may cancel. Idempotent: cancelling an already-cancelled
    /// reservation returns the existing record unchanged.
    pub async fn cancel(&self, id: Ulid, requester: &str) -> Result<Reservation, EngineError> {
        validate_requester(requester)?;
        let (record, mut guard) = self.resolve_reservation_write(&id).await?;
        if record.requester != requester {
            return Err(EngineError::Forbidden(id));
        }
        let event = match record.status {
            ReservationStatus::Cancelled => return Ok(record),
            ReservationStatus::Pending => Event::HoldReleased {
                id,
                room_id: record.room_id.clone(),
            },
            ReservationStatus::Confirmed => Event::Cancelled {
                id,
                room_id: record.room_id.clone(),
            },
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::CANCELLATIONS_TOTAL).increment(1);
        info!("reservation cancelled. room_id='{}', reservation={id}", record.room_id);
        self.reservation(&id).ok_or(EngineError::NotFound(id))
    }

    /// Move a reservation to a new interval, atomically under the room lock.
    /// On conflict the original reservation is left untouched.
    pub async fn reschedule(
        &self,
        id: Ulid,
        requester: &str,
        new_start: Ms,
        new_end: Ms,
    ) -> Result<Reservation, EngineError> {
        validate_requester(requester)?;
        let span = validate_span(new_start, new_end)?;
        let (record, mut guard) = self.resolve_reservation_write(&id).await?;
        if record.requester != requester {
            return Err(EngineError::Forbidden(id));
        }
        match record.status {
            ReservationStatus::Cancelled => return Err(EngineError::NotActive(id)),
            ReservationStatus::Pending if record.expires_at.is_some_and(|t| t <= now_ms()) => {
                return Err(EngineError::HoldExpired(id));
            }
            _ => {}
        }

        let now = now_ms();
        // The reservation never conflicts with itself.
        check_no_conflict(&guard, &span, now, Some(id))?;

        let event = Event::Rescheduled {
            id,
            room_id: record.room_id.clone(),
            span,
        };
        self.wal_append(&event).await?;
        let mut entry = guard
            .remove_entry(id)
            .ok_or_else(|| EngineError::ConsistencyViolation {
                room_id: record.room_id.clone(),
                conflicting: id,
            })?;
        entry.span = span;
        guard
            .insert_entry(entry, now)
            .map_err(|conflicting| EngineError::ConsistencyViolation {
                room_id: record.room_id.clone(),
                conflicting,
            })?;
        if let Some(mut r) = self.reservations.get_mut(&id) {
            r.span = span;
        }
        self.notify.send(&record.room_id, &event);
        info!(
            "reservation rescheduled. room_id='{}', reservation={id}, interval=[{new_start}, {new_end})",
            record.room_id
        );
        self.reservation(&id).ok_or(EngineError::NotFound(id))
    }

    /// Release a lapsed hold, returning whether anything was released.
    /// Reaper surface — no requester check, and a hold that was confirmed or
    /// cancelled in the meantime is left alone.
    pub async fn expire_hold(&self, id: Ulid) -> Result<bool, EngineError> {
        let (record, mut guard) = self.resolve_reservation_write(&id).await?;
        let lapsed = record.status == ReservationStatus::Pending
            && record.expires_at.is_some_and(|t| t <= now_ms());
        if !lapsed {
            return Ok(false);
        }
        let event = Event::HoldReleased {
            id,
            room_id: record.room_id.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::HOLDS_EXPIRED_TOTAL).increment(1);
        Ok(true)
    }

    /// WAL-append, then insert into the schedule with the store's defensive
    /// overlap re-check, then record history. An insert refusal here means
    /// the coordinator's own check was bypassed — surfaced as fatal.
    async fn commit_entry(
        &self,
        guard: &mut RoomSchedule,
        event: Event,
        entry: ScheduleEntry,
    ) -> Result<(), EngineError> {
        self.wal_append(&event).await?;
        let now = now_ms();
        guard
            .insert_entry(entry, now)
            .map_err(|conflicting| EngineError::ConsistencyViolation {
                room_id: guard.id.clone(),
                conflicting,
            })?;
        super::apply_history(&self.reservations, &event);
        self.notify.send(&guard.id, &event);
        Ok(())
    }

    fn replay_token(&self, token: &str, hit: TokenHit) -> Result<Reservation, EngineError> {
        match hit {
            TokenHit::Replay(reservation_id) => {
                metrics::counter!(crate::observability::IDEMPOTENT_REPLAYS_TOTAL).increment(1);
                info!("booking replayed from idempotency token. reservation={reservation_id}");
                self.reservation(&reservation_id)
                    .ok_or(EngineError::NotFound(reservation_id))
            }
            TokenHit::Mismatch => Err(EngineError::TokenMismatch(token.to_string())),
        }
    }
}
