use std::collections::VecDeque;
use std::sync::Mutex;

use dashmap::DashMap;
use ulid::Ulid;

use crate::model::{Ms, RoomId, Span};

/// Outcome of a token lookup.
#[derive(Debug, PartialEq, Eq)]
pub enum TokenHit {
    /// Same token, same parameters — return the original reservation.
    Replay(Ulid),
    /// Same token, different parameters — caller bug.
    Mismatch,
}

#[derive(Debug, Clone)]
struct TokenEntry {
    room_id: RoomId,
    span: Span,
    requester: String,
    reservation_id: Ulid,
    recorded_at: Ms,
}

/// Cache of committed booking tokens, so a client retry after a timeout
/// replays the original result instead of double-booking.
///
/// Entries live for `retention_ms` and the cache is size-capped: once
/// `max_entries` is reached the oldest entry is evicted. Only successful
/// bookings are recorded — a conflicted request is deterministic to re-run.
pub struct TokenCache {
    entries: DashMap<String, TokenEntry>,
    /// Insertion order, for expiry sweeps and oldest-first eviction.
    order: Mutex<VecDeque<(Ms, String)>>,
    retention_ms: Ms,
    max_entries: usize,
}

impl TokenCache {
    pub fn new(retention_ms: Ms, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            retention_ms,
            max_entries,
        }
    }

    /// Look up a token. Entries past retention are treated as absent.
    pub fn lookup(
        &self,
        token: &str,
        room_id: &str,
        span: &Span,
        requester: &str,
        now: Ms,
    ) -> Option<TokenHit> {
        let entry = self.entries.get(token)?;
        if now - entry.recorded_at > self.retention_ms {
            return None;
        }
        if entry.room_id == room_id && entry.span == *span && entry.requester == requester {
            Some(TokenHit::Replay(entry.reservation_id))
        } else {
            Some(TokenHit::Mismatch)
        }
    }

    /// Record a committed booking against its token.
    pub fn record(
        &self,
        token: &str,
        room_id: &str,
        span: Span,
        requester: &str,
        reservation_id: Ulid,
        now: Ms,
    ) {
        let mut order = self.order.lock().expect("token cache order poisoned");
        while self.entries.len() >= self.max_entries {
            let Some((queued_at, oldest)) = order.pop_front() else {
                break;
            };
            // Skip stale queue entries for tokens that were re-recorded since;
            // their newer queue entry is further back.
            self.entries.remove_if(&oldest, |_, e| e.recorded_at == queued_at);
        }
        self.entries.insert(
            token.to_string(),
            TokenEntry {
                room_id: room_id.to_string(),
                span,
                requester: requester.to_string(),
                reservation_id,
                recorded_at: now,
            },
        );
        order.push_back((now, token.to_string()));
    }

    /// Drop every entry recorded more than the retention window ago.
    /// Called periodically by the reaper.
    pub fn evict_expired(&self, now: Ms) -> usize {
        let mut order = self.order.lock().expect("token cache order poisoned");
        let mut evicted = 0;
        while let Some((queued_at, _)) = order.front() {
            if now - queued_at <= self.retention_ms {
                break;
            }
            let (queued_at, token) = order.pop_front().unwrap();
            if self
                .entries
                .remove_if(&token, |_, e| e.recorded_at == queued_at)
                .is_some()
            {
                evicted += 1;
            }
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> TokenCache {
        TokenCache::new(1000, 4)
    }

    #[test]
    fn replay_on_matching_parameters() {
        let c = cache();
        let rid = Ulid::new();
        let span = Span::new(100, 200);
        c.record("tok-1", "r1", span, "alice", rid, 0);

        assert_eq!(
            c.lookup("tok-1", "r1", &span, "alice", 500),
            Some(TokenHit::Replay(rid))
        );
    }

    #[test]
    fn mismatch_on_different_parameters() {
        let c = cache();
        let span = Span::new(100, 200);
        c.record("tok-1", "r1", span, "alice", Ulid::new(), 0);

        assert_eq!(
            c.lookup("tok-1", "r2", &span, "alice", 500),
            Some(TokenHit::Mismatch)
        );
        assert_eq!(
            c.lookup("tok-1", "r1", &Span::new(100, 300), "alice", 500),
            Some(TokenHit::Mismatch)
        );
        assert_eq!(
            c.lookup("tok-1", "r1", &span, "bob", 500),
            Some(TokenHit::Mismatch)
        );
    }

    #[test]
    fn unknown_token_misses() {
        let c = cache();
        assert_eq!(c.lookup("nope", "r1", &Span::new(0, 100), "alice", 0), None);
    }

    #[test]
    fn retention_window_expires_entries() {
        let c = cache();
        let span = Span::new(100, 200);
        c.record("tok-1", "r1", span, "alice", Ulid::new(), 0);

        assert!(c.lookup("tok-1", "r1", &span, "alice", 1000).is_some());
        assert_eq!(c.lookup("tok-1", "r1", &span, "alice", 1001), None);
    }

    #[test]
    fn evict_expired_sweeps_in_order() {
        let c = cache();
        let span = Span::new(100, 200);
        c.record("old-1", "r1", span, "alice", Ulid::new(), 0);
        c.record("old-2", "r1", span, "alice", Ulid::new(), 100);
        c.record("fresh", "r1", span, "alice", Ulid::new(), 2000);

        assert_eq!(c.evict_expired(2500), 2);
        assert_eq!(c.len(), 1);
        assert!(c.lookup("fresh", "r1", &span, "alice", 2500).is_some());
    }

    #[test]
    fn rerecorded_token_survives_stale_queue_entry() {
        let c = cache();
        let span = Span::new(100, 200);
        c.record("tok", "r1", span, "alice", Ulid::new(), 0);
        // Retention passes and the same token is recorded again
        let new_id = Ulid::new();
        c.record("tok", "r1", span, "alice", new_id, 2000);

        // Sweeping drops only the stale queue entry, not the fresh record
        assert_eq!(c.evict_expired(2500), 0);
        assert_eq!(
            c.lookup("tok", "r1", &span, "alice", 2500),
            Some(TokenHit::Replay(new_id))
        );
    }

    #[test]
    fn size_cap_evicts_oldest() {
        let c = cache(); // max 4 entries
        let span = Span::new(100, 200);
        for i in 0..5 {
            c.record(&format!("tok-{i}"), "r1", span, "alice", Ulid::new(), i);
        }
        assert_eq!(c.len(), 4);
        assert_eq!(c.lookup("tok-0", "r1", &span, "alice", 10), None);
        assert!(c.lookup("tok-4", "r1", &span, "alice", 10).is_some());
    }
}
