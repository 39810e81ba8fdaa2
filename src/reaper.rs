use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

/// Background task that periodically releases lapsed holds and evicts stale
/// idempotency tokens.
pub async fn run_reaper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;
        let now = now_ms();
        let expired = engine.collect_expired_holds(now);
        for (hold_id, room_id) in expired {
            match engine.expire_hold(hold_id).await {
                Ok(true) => info!("reaped lapsed hold {hold_id} in room '{room_id}'"),
                // Confirmed or cancelled since we looked — that's fine
                Ok(false) => {}
                Err(e) => tracing::debug!("reaper skip {hold_id}: {e}"),
            }
        }
        let evicted = engine.evict_expired_tokens(now);
        if evicted > 0 {
            tracing::debug!("evicted {evicted} idempotency tokens");
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends >= threshold {
            match engine.compact_wal().await {
                Ok(()) => info!("compacted WAL after {appends} appends"),
                Err(e) => tracing::warn!("WAL compaction failed: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ReservationStatus;
    use crate::notify::NotifyHub;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("stanza_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn reaper_collects_and_releases_lapsed_holds() {
        let path = test_wal_path("reaper_collect.wal");
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(path, notify).unwrap());

        engine.add_room("r1", None, 1).await.unwrap();

        // A one-millisecond hold lapses immediately
        let hold = engine.hold("r1", 1000, 2000, "alice", 1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let now = now_ms();
        let expired = engine.collect_expired_holds(now);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, hold.id);

        assert!(engine.expire_hold(hold.id).await.unwrap());
        assert_eq!(
            engine.get(&hold.id).unwrap().status,
            ReservationStatus::Cancelled
        );

        assert!(engine.collect_expired_holds(now).is_empty());
        // Releasing again is a no-op
        assert!(!engine.expire_hold(hold.id).await.unwrap());
    }

    #[tokio::test]
    async fn confirmed_hold_is_not_reaped() {
        let path = test_wal_path("reaper_confirmed.wal");
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(path, notify).unwrap());

        engine.add_room("r1", None, 1).await.unwrap();
        let hold = engine.hold("r1", 1000, 2000, "alice", 60_000).await.unwrap();
        engine.confirm(hold.id, "alice").await.unwrap();

        assert!(engine.collect_expired_holds(now_ms() + 120_000).is_empty());
    }
}
