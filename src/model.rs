use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Opaque room identifier supplied by the caller, trimmed and non-empty.
pub type RoomId = String;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Clip to `window`. Caller must ensure the spans overlap.
    pub fn clamp_to(&self, window: &Span) -> Span {
        Span::new(self.start.max(window.start), self.end.min(window.end))
    }
}

/// Lifecycle state of a reservation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    /// Held but not yet confirmed; lapses at `expires_at`.
    Pending,
    Confirmed,
    /// Terminal. Kept in history, excluded from overlap checks.
    Cancelled,
}

/// A reservation record. Owned by the coordinator's append-only history;
/// records transition Pending → Confirmed → Cancelled but are never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub room_id: RoomId,
    pub span: Span,
    pub requester: String,
    pub status: ReservationStatus,
    /// Set only while the reservation is a pending hold.
    pub expires_at: Option<Ms>,
}

/// What a schedule entry blocks the room as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Pending hold; stops blocking once `expires_at` has passed.
    Held { expires_at: Ms },
    Confirmed,
}

/// One active interval in a room's schedule. Cancelled reservations have no
/// entry — they live only in the history map and the WAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub id: Ulid,
    pub span: Span,
    pub kind: EntryKind,
}

impl ScheduleEntry {
    /// Whether this entry excludes other reservations at instant `now`.
    pub fn blocks_at(&self, now: Ms) -> bool {
        match self.kind {
            EntryKind::Held { expires_at } => expires_at > now,
            EntryKind::Confirmed => true,
        }
    }
}

/// Per-room interval index: active entries sorted by `span.start`.
///
/// Overlap queries are O(log n + k) — binary search for the window bound,
/// then a bounded scan. Not internally synchronized; the coordinator wraps
/// each schedule in its own lock.
#[derive(Debug, Clone)]
pub struct RoomSchedule {
    pub id: RoomId,
    pub name: Option<String>,
    pub capacity: u32,
    /// Retired rooms reject new reservations but keep their schedule.
    pub active: bool,
    pub entries: Vec<ScheduleEntry>,
}

impl RoomSchedule {
    pub fn new(id: RoomId, name: Option<String>, capacity: u32) -> Self {
        Self {
            id,
            name,
            capacity,
            active: true,
            entries: Vec::new(),
        }
    }

    /// Insert maintaining sort order by span.start. No conflict check —
    /// replay path only; the WAL is authoritative.
    pub fn insert_unchecked(&mut self, entry: ScheduleEntry) {
        let pos = self
            .entries
            .binary_search_by_key(&entry.span.start, |e| e.span.start)
            .unwrap_or_else(|e| e);
        self.entries.insert(pos, entry);
    }

    /// Insert with a defensive overlap re-check. The coordinator has already
    /// validated the interval under the room lock; a conflict here signals a
    /// coordination bug upstream and returns the conflicting reservation id.
    pub fn insert_entry(&mut self, entry: ScheduleEntry, now: Ms) -> Result<(), Ulid> {
        if let Some(conflicting) = self.first_conflict(&entry.span, now, Some(entry.id)) {
            return Err(conflicting);
        }
        self.insert_unchecked(entry);
        Ok(())
    }

    /// Remove an entry by reservation id. Idempotent — absent id is a no-op.
    pub fn remove_entry(&mut self, id: Ulid) -> Option<ScheduleEntry> {
        if let Some(pos) = self.entries.iter().position(|e| e.id == id) {
            Some(self.entries.remove(pos))
        } else {
            None
        }
    }

    /// Entries whose span overlaps the query window.
    /// Uses binary search to skip entries starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &ScheduleEntry> {
        // Everything at index >= right_bound starts at or after query.end → can't overlap.
        let right_bound = self.entries.partition_point(|e| e.span.start < query.end);
        self.entries[..right_bound]
            .iter()
            .filter(move |e| e.span.end > query.start)
    }

    /// First entry that blocks `span` at instant `now`, skipping `exclude`
    /// (a reservation never conflicts with itself during reschedule).
    pub fn first_conflict(&self, span: &Span, now: Ms, exclude: Option<Ulid>) -> Option<Ulid> {
        self.overlapping(span)
            .find(|e| Some(e.id) != exclude && e.blocks_at(now))
            .map(|e| e.id)
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomAdded {
        id: RoomId,
        name: Option<String>,
        capacity: u32,
    },
    RoomRetired {
        id: RoomId,
    },
    HoldPlaced {
        id: Ulid,
        room_id: RoomId,
        span: Span,
        requester: String,
        expires_at: Ms,
    },
    HoldConfirmed {
        id: Ulid,
        room_id: RoomId,
    },
    HoldReleased {
        id: Ulid,
        room_id: RoomId,
    },
    Booked {
        id: Ulid,
        room_id: RoomId,
        span: Span,
        requester: String,
    },
    Cancelled {
        id: Ulid,
        room_id: RoomId,
    },
    Rescheduled {
        id: Ulid,
        room_id: RoomId,
        span: Span,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomInfo {
    pub id: RoomId,
    pub name: Option<String>,
    pub capacity: u32,
    pub active: bool,
    /// Active (non-cancelled) reservations currently on the schedule.
    pub reservations: usize,
}
