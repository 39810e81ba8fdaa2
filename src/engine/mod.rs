mod conflict;
mod error;
mod mutations;
mod queries;
mod windows;

pub use error::EngineError;
pub use windows::{free_windows, merge_overlapping, subtract_intervals};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::idempotency::TokenCache;
use crate::limits::{IDEMPOTENCY_RETENTION_MS, MAX_IDEMPOTENCY_ENTRIES};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedRoomSchedule = Arc<RwLock<RoomSchedule>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The reservation coordinator: single source of truth for the per-room
/// check-then-commit sequence, the append-only reservation history, and the
/// idempotency token cache.
///
/// Rooms are independent — each schedule sits behind its own lock, so
/// bookings in distinct rooms proceed in parallel while commits within one
/// room are strictly serialized.
pub struct Engine {
    pub rooms: DashMap<RoomId, SharedRoomSchedule>,
    /// Append-only history: every reservation ever created, by id. Records
    /// transition status but are never removed.
    pub(super) reservations: DashMap<Ulid, Reservation>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) tokens: TokenCache,
}

/// Record the history side of a placement event. The commit path inserts the
/// schedule entry itself (with the store's defensive re-check); replay goes
/// through `apply_to_room`.
pub(super) fn apply_history(reservations: &DashMap<Ulid, Reservation>, event: &Event) {
    match event {
        Event::HoldPlaced {
            id,
            room_id,
            span,
            requester,
            expires_at,
        } => {
            reservations.insert(
                *id,
                Reservation {
                    id: *id,
                    room_id: room_id.clone(),
                    span: *span,
                    requester: requester.clone(),
                    status: ReservationStatus::Pending,
                    expires_at: Some(*expires_at),
                },
            );
        }
        Event::Booked {
            id,
            room_id,
            span,
            requester,
        } => {
            reservations.insert(
                *id,
                Reservation {
                    id: *id,
                    room_id: room_id.clone(),
                    span: *span,
                    requester: requester.clone(),
                    status: ReservationStatus::Confirmed,
                    expires_at: None,
                },
            );
        }
        _ => {}
    }
}

/// Apply an event to a room's schedule and the history map.
/// No locking — caller holds the room lock (or owns everything, on replay).
fn apply_to_room(room: &mut RoomSchedule, event: &Event, reservations: &DashMap<Ulid, Reservation>) {
    match event {
        Event::HoldPlaced {
            id,
            span,
            expires_at,
            ..
        } => {
            room.insert_unchecked(ScheduleEntry {
                id: *id,
                span: *span,
                kind: EntryKind::Held {
                    expires_at: *expires_at,
                },
            });
            apply_history(reservations, event);
        }
        Event::HoldConfirmed { id, .. } => {
            if let Some(mut entry) = room.remove_entry(*id) {
                entry.kind = EntryKind::Confirmed;
                room.insert_unchecked(entry);
            }
            if let Some(mut record) = reservations.get_mut(id) {
                record.status = ReservationStatus::Confirmed;
                record.expires_at = None;
            }
        }
        Event::HoldReleased { id, .. } | Event::Cancelled { id, .. } => {
            room.remove_entry(*id);
            if let Some(mut record) = reservations.get_mut(id) {
                record.status = ReservationStatus::Cancelled;
            }
        }
        Event::Booked { id, span, .. } => {
            room.insert_unchecked(ScheduleEntry {
                id: *id,
                span: *span,
                kind: EntryKind::Confirmed,
            });
            apply_history(reservations, event);
        }
        Event::Rescheduled { id, span, .. } => {
            if let Some(mut entry) = room.remove_entry(*id) {
                entry.span = *span;
                room.insert_unchecked(entry);
            }
            if let Some(mut record) = reservations.get_mut(id) {
                record.span = *span;
            }
        }
        Event::RoomRetired { .. } => {
            room.active = false;
        }
        // RoomAdded is handled at the DashMap level, not here
        Event::RoomAdded { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            reservations: DashMap::new(),
            wal_tx,
            notify,
            tokens: TokenCache::new(IDEMPOTENCY_RETENTION_MS, MAX_IDEMPOTENCY_ENTRIES),
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this may run inside an async context.
        for event in &events {
            match event {
                Event::RoomAdded { id, name, capacity } => {
                    let room = RoomSchedule::new(id.clone(), name.clone(), *capacity);
                    engine.rooms.insert(id.clone(), Arc::new(RwLock::new(room)));
                }
                other => {
                    if let Some(room_id) = event_room_id(other)
                        && let Some(entry) = engine.rooms.get(room_id)
                    {
                        let room_arc = entry.value().clone();
                        drop(entry);
                        let mut guard = room_arc.try_write().expect("replay: uncontended write");
                        apply_to_room(&mut guard, other, &engine.reservations);
                    }
                }
            }
        }
        metrics::gauge!(crate::observability::ROOMS).set(engine.rooms.len() as f64);

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_room(&self, id: &str) -> Option<SharedRoomSchedule> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    /// WAL-append + apply + notify in one call. The WAL append is the commit
    /// point: state is mutated only after the event is durably logged, so an
    /// abandoned caller can never leave partial state behind.
    pub(super) async fn persist_and_apply(
        &self,
        room: &mut RoomSchedule,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        let room_id = room.id.clone();
        apply_to_room(room, event, &self.reservations);
        self.notify.send(&room_id, event);
        Ok(())
    }

    /// Look up a reservation, then acquire its room's write lock and re-read
    /// the record under the lock (it may have changed in between).
    pub(super) async fn resolve_reservation_write(
        &self,
        id: &Ulid,
    ) -> Result<(Reservation, tokio::sync::OwnedRwLockWriteGuard<RoomSchedule>), EngineError> {
        let room_id = self
            .reservations
            .get(id)
            .map(|r| r.room_id.clone())
            .ok_or(EngineError::NotFound(*id))?;
        let room = self
            .get_room(&room_id)
            .ok_or(EngineError::RoomNotFound(room_id))?;
        let guard = room.write_owned().await;
        let record = self
            .reservations
            .get(id)
            .map(|r| r.clone())
            .ok_or(EngineError::NotFound(*id))?;
        Ok((record, guard))
    }

    pub(super) fn reservation(&self, id: &Ulid) -> Option<Reservation> {
        self.reservations.get(id).map(|r| r.clone())
    }

    /// Pending holds whose expiry has passed, for the reaper.
    pub fn collect_expired_holds(&self, now: Ms) -> Vec<(Ulid, RoomId)> {
        let mut expired = Vec::new();
        for entry in self.rooms.iter() {
            let room = entry.value().clone();
            if let Ok(guard) = room.try_read() {
                for e in &guard.entries {
                    if let EntryKind::Held { expires_at } = e.kind
                        && expires_at <= now
                    {
                        expired.push((e.id, guard.id.clone()));
                    }
                }
            }
        }
        expired
    }

    /// Evict idempotency tokens past the retention window. Reaper surface.
    pub fn evict_expired_tokens(&self, now: Ms) -> usize {
        let evicted = self.tokens.evict_expired(now);
        metrics::gauge!(crate::observability::TOKEN_CACHE_ENTRIES).set(self.tokens.len() as f64);
        evicted
    }

    /// Compact the WAL down to the events needed to recreate current state.
    /// History is preserved: cancelled reservations compact to a
    /// place-then-terminate event pair, never silently disappear.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let room_arcs: Vec<SharedRoomSchedule> =
            self.rooms.iter().map(|e| e.value().clone()).collect();
        for room in &room_arcs {
            let guard = room.read().await;
            events.push(Event::RoomAdded {
                id: guard.id.clone(),
                name: guard.name.clone(),
                capacity: guard.capacity,
            });
            if !guard.active {
                events.push(Event::RoomRetired { id: guard.id.clone() });
            }
        }

        for record in self.reservations.iter() {
            let r = record.value();
            match (r.status, r.expires_at) {
                (ReservationStatus::Pending, Some(expires_at)) => {
                    events.push(Event::HoldPlaced {
                        id: r.id,
                        room_id: r.room_id.clone(),
                        span: r.span,
                        requester: r.requester.clone(),
                        expires_at,
                    });
                }
                (ReservationStatus::Confirmed, _) => {
                    events.push(Event::Booked {
                        id: r.id,
                        room_id: r.room_id.clone(),
                        span: r.span,
                        requester: r.requester.clone(),
                    });
                }
                (ReservationStatus::Cancelled, Some(expires_at)) => {
                    events.push(Event::HoldPlaced {
                        id: r.id,
                        room_id: r.room_id.clone(),
                        span: r.span,
                        requester: r.requester.clone(),
                        expires_at,
                    });
                    events.push(Event::HoldReleased {
                        id: r.id,
                        room_id: r.room_id.clone(),
                    });
                }
                (ReservationStatus::Cancelled, None) => {
                    events.push(Event::Booked {
                        id: r.id,
                        room_id: r.room_id.clone(),
                        span: r.span,
                        requester: r.requester.clone(),
                    });
                    events.push(Event::Cancelled {
                        id: r.id,
                        room_id: r.room_id.clone(),
                    });
                }
                // A pending hold always carries its expiry.
                (ReservationStatus::Pending, None) => unreachable!("pending hold without expiry"),
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Extract the room id from an event (for non-RoomAdded events).
fn event_room_id(event: &Event) -> Option<&str> {
    match event {
        Event::HoldPlaced { room_id, .. }
        | Event::HoldConfirmed { room_id, .. }
        | Event::HoldReleased { room_id, .. }
        | Event::Booked { room_id, .. }
        | Event::Cancelled { room_id, .. }
        | Event::Rescheduled { room_id, .. } => Some(room_id),
        Event::RoomRetired { id } => Some(id),
        Event::RoomAdded { .. } => None,
    }
}
