use std::sync::Arc;
use std::time::Duration;

use publisher::maintenance::StateCleanupService;
use publisher::repositories::OAuthStateRepository;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[path = "test_utils/mod.rs"]
mod test_utils;

use test_utils::{setup_test_db_arc, test_config};

#[tokio::test]
async fn test_sweep_removes_only_expired_states() {
    let db = setup_test_db_arc().await.unwrap();
    let states = OAuthStateRepository::new(db);
    let user_id = Uuid::new_v4();

    states.create(user_id, "tiktok", "old-1", None, -5).await.unwrap();
    states.create(user_id, "youtube", "old-2", None, -1).await.unwrap();
    states.create(user_id, "instagram", "fresh", None, 15).await.unwrap();

    let service = StateCleanupService::new(
        Arc::new(test_config("http://unused.test")),
        states.clone(),
    );
    assert_eq!(service.sweep().await, 2);
    assert_eq!(service.sweep().await, 0);

    assert_eq!(states.count_active_for_user(user_id).await.unwrap(), 1);
    assert!(states.find_valid("instagram", "fresh").await.unwrap().is_some());
}

#[tokio::test]
async fn test_expired_state_cannot_be_consumed() {
    let db = setup_test_db_arc().await.unwrap();
    let states = OAuthStateRepository::new(db);

    states
        .create(Uuid::new_v4(), "tiktok", "stale", None, -1)
        .await
        .unwrap();
    assert!(states.consume("tiktok", "stale").await.unwrap().is_none());
}

#[tokio::test]
async fn test_cleanup_task_stops_on_shutdown() {
    let db = setup_test_db_arc().await.unwrap();
    let mut config = test_config("http://unused.test");
    config.state_cleanup_interval_seconds = 3600;

    let service = StateCleanupService::new(Arc::new(config), OAuthStateRepository::new(db));
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(service.run(shutdown.clone()));

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("cleanup task did not stop")
        .unwrap();
}
