use std::sync::Arc;

use video_progress_sync::{
    config::{Config, StorageBackend},
    domain::{StorageKind, SyncRequest},
    intervals::Interval,
    storage::{self, DatabaseProgressStore, ProgressStore, StoreError},
};

fn connection_string(dir: &tempfile::TempDir) -> String {
    format!("sqlite://{}?mode=rwc", dir.path().join("progress.sqlite").display())
}

fn request(intervals: Vec<Interval>, total_duration: i64) -> SyncRequest {
    SyncRequest {
        new_intervals: intervals,
        last_watched_time: None,
        total_duration,
        force_progress: None,
    }
}

#[tokio::test]
async fn records_survive_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let conn = connection_string(&dir);

    let store = DatabaseProgressStore::connect(&conn).await.unwrap();
    assert_eq!(store.kind(), StorageKind::Durable);
    assert_eq!(store.get("u1", "v1").await.unwrap(), None);
    store
        .merge_and_save(
            "u1",
            "v1",
            &SyncRequest {
                last_watched_time: Some(9),
                ..request(vec![Interval::new(0, 9)], 20)
            },
        )
        .await
        .unwrap();
    drop(store);

    let reopened = DatabaseProgressStore::connect(&conn).await.unwrap();
    let record = reopened.get("u1", "v1").await.unwrap().unwrap();
    assert_eq!(record.watched_intervals, vec![Interval::new(0, 9)]);
    assert_eq!(record.progress, 50.0);
    assert_eq!(record.last_watched_time, 9);
    assert_eq!(record.total_duration, 20);
}

#[tokio::test]
async fn merge_updates_existing_row() {
    let dir = tempfile::tempdir().unwrap();
    let store = DatabaseProgressStore::connect(&connection_string(&dir)).await.unwrap();

    store
        .merge_and_save("u1", "v1", &request(vec![Interval::new(0, 39)], 100))
        .await
        .unwrap();
    let record = store
        .merge_and_save("u1", "v1", &request(vec![Interval::new(41, 50)], 200))
        .await
        .unwrap();
    assert_eq!(
        record.watched_intervals,
        vec![Interval::new(0, 39), Interval::new(41, 50)]
    );
    // 50 of 200 seconds recomputes to 25%, the stored 40% stands
    assert_eq!(record.progress, 40.0);
    assert_eq!(record.total_duration, 200);

    let forced = store
        .merge_and_save(
            "u1",
            "v1",
            &SyncRequest {
                force_progress: Some(12.5),
                ..request(vec![], 200)
            },
        )
        .await
        .unwrap();
    assert_eq!(forced.progress, 12.5);
    assert_eq!(store.get("u1", "v1").await.unwrap(), Some(forced));
}

#[tokio::test]
async fn invalid_request_is_rejected_before_writing() {
    let dir = tempfile::tempdir().unwrap();
    let store = DatabaseProgressStore::connect(&connection_string(&dir)).await.unwrap();
    let err = store
        .merge_and_save("u1", "v1", &request(vec![Interval::new(3, 1)], 100))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
    assert_eq!(store.get("u1", "v1").await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_merges_on_one_key_lose_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(DatabaseProgressStore::connect(&connection_string(&dir)).await.unwrap());
    let mut handles = Vec::new();
    for i in 0..10 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let start = i * 10;
            store
                .merge_and_save("u1", "v1", &request(vec![Interval::new(start, start + 4)], 100))
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    let record = store.get("u1", "v1").await.unwrap().unwrap();
    assert_eq!(record.watched_intervals.len(), 10);
    assert_eq!(record.progress, 50.0);
}

#[tokio::test]
async fn auto_backend_falls_back_to_memory() {
    let dir = tempfile::tempdir().unwrap();
    let unreachable = format!(
        "sqlite://{}?mode=ro",
        dir.path().join("missing").join("progress.sqlite").display()
    );

    let config = Config {
        storage_backend: StorageBackend::Auto,
        db_connection_string: unreachable.clone(),
        ..Config::default()
    };
    let store = storage::open(&config).await.unwrap();
    assert_eq!(store.kind(), StorageKind::Transient);

    let config = Config {
        storage_backend: StorageBackend::Durable,
        db_connection_string: unreachable,
        ..Config::default()
    };
    assert!(storage::open(&config).await.is_err());

    let config = Config {
        storage_backend: StorageBackend::Durable,
        db_connection_string: connection_string(&dir),
        ..Config::default()
    };
    assert_eq!(storage::open(&config).await.unwrap().kind(), StorageKind::Durable);
}
