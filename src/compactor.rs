use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Compact once more than `threshold` events were appended since the last
/// compaction. Returns whether it compacted.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends <= threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!("compacted WAL after {appends} appends");
            true
        }
        Err(e) => {
            tracing::error!("WAL compaction failed: {e}");
            false
        }
    }
}

/// Background task that keeps the WAL from growing without bound.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_needed(&engine, threshold).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Dispatcher;
    use crate::mailer::StubMailer;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use crate::wal::Wal;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("tablebook_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let dispatch = Arc::new(Dispatcher::new(
            Arc::new(NotifyHub::new()),
            Arc::new(StubMailer::failing()),
        ));
        let engine = Engine::new(path.clone(), dispatch).unwrap();
        let owner = Principal::owner(Ulid::new(), "");
        let created = engine
            .create_restaurant(
                &owner,
                NewRestaurant {
                    id: Ulid::new(),
                    name: "Noodle Bar".into(),
                    location: None,
                    contact: None,
                    cuisines: vec![],
                    opening: "11:00".into(),
                    closing: "21:00".into(),
                    capacity: TableCounts::new(3, 0, 0),
                },
            )
            .await
            .unwrap();
        for i in 0..5 {
            let patch = RestaurantPatch {
                name: Some(format!("Noodle Bar {i}")),
                ..Default::default()
            };
            engine.update_restaurant(&owner, created.id, patch).await.unwrap();
        }

        assert!(!compact_if_needed(&engine, 10).await);
        assert!(compact_if_needed(&engine, 3).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        let events = Wal::replay(&path).unwrap();
        assert_eq!(events.len(), 1);
        let Event::RestaurantCreated { restaurant } = &events[0] else {
            panic!("expected RestaurantCreated");
        };
        assert_eq!(restaurant.name, "Noodle Bar 4");
    }
}
