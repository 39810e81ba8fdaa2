use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: bookings committed.
pub const BOOKINGS_TOTAL: &str = "stanza_bookings_total";

/// Counter: booking/reschedule attempts rejected with a conflict.
pub const CONFLICTS_TOTAL: &str = "stanza_conflicts_total";

/// Counter: holds placed.
pub const HOLDS_PLACED_TOTAL: &str = "stanza_holds_placed_total";

/// Counter: holds lapsed and reaped.
pub const HOLDS_EXPIRED_TOTAL: &str = "stanza_holds_expired_total";

/// Counter: cancellations (including hold releases).
pub const CANCELLATIONS_TOTAL: &str = "stanza_cancellations_total";

/// Counter: bookings answered from the idempotency token cache.
pub const IDEMPOTENT_REPLAYS_TOTAL: &str = "stanza_idempotent_replays_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: registered rooms (active and retired).
pub const ROOMS: &str = "stanza_rooms";

/// Gauge: live idempotency token cache entries.
pub const TOKEN_CACHE_ENTRIES: &str = "stanza_token_cache_entries";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "stanza_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "stanza_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init_metrics(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Install the fmt tracing subscriber. No-op if one is already set, so
/// embedding services and tests can both call it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}
