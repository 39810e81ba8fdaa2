//! Hard bounds on inputs and state. Everything here exists so a single
//! misbehaving caller can't balloon memory or wedge a room's schedule.

use crate::model::Ms;

pub const MAX_ROOMS: usize = 100_000;
pub const MAX_RESERVATIONS_PER_ROOM: usize = 100_000;

pub const MAX_ROOM_ID_LEN: usize = 256;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_REQUESTER_LEN: usize = 256;
pub const MAX_TOKEN_LEN: usize = 256;

/// Epoch — negative timestamps are caller bugs.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2100-01-01T00:00:00Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// One year — no single reservation spans longer.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * 24 * 3_600_000;

/// Widest window accepted by listing and free-window queries.
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * 24 * 3_600_000;

/// Longest time a pending hold may block a room before lapsing.
pub const MAX_HOLD_TTL_MS: Ms = 7 * 24 * 3_600_000;

/// How long a committed idempotency token keeps returning the original
/// reservation. Covers client retry-after-timeout, not replay archaeology.
pub const IDEMPOTENCY_RETENTION_MS: Ms = 24 * 3_600_000;

/// Token cache size cap; oldest entries are evicted past this.
pub const MAX_IDEMPOTENCY_ENTRIES: usize = 100_000;
