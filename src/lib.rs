//! stanza — a room reservation engine.
//!
//! The crate is the conflict-resolution core of a reservation service: a
//! per-room interval index ([`model::RoomSchedule`]) and a coordinator
//! ([`engine::Engine`]) that runs the check-then-commit protocol under
//! per-room locks, keeps an append-only reservation history, deduplicates
//! client retries by idempotency token, and logs every committed event to a
//! crash-safe WAL. Transport, serialization endpoints, and persistence
//! adapters live outside this crate and consume the typed engine API.

pub mod engine;
pub mod idempotency;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod wal;
