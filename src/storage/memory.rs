use std::collections::HashMap;

use tokio::sync::RwLock;

use super::{ProgressStore, RecordKey, StoreError, locks::KeyedLocks};
use crate::domain::{ProgressRecord, StorageKind, SyncRequest, apply_sync};

/// Transient backend: records live in process memory and vanish on restart.
#[derive(Debug, Default)]
pub struct MemoryProgressStore {
    records: RwLock<HashMap<RecordKey, ProgressRecord>>,
    locks: KeyedLocks,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait::async_trait]
impl ProgressStore for MemoryProgressStore {
    fn kind(&self) -> StorageKind {
        StorageKind::Transient
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get(&self, user_id: &str, video_id: &str) -> Result<Option<ProgressRecord>, StoreError> {
        let key = RecordKey::new(user_id, video_id);
        Ok(self.records.read().await.get(&key).cloned())
    }

    #[tracing::instrument(level = "debug", skip(self, request))]
    async fn merge_and_save(
        &self,
        user_id: &str,
        video_id: &str,
        request: &SyncRequest,
    ) -> Result<ProgressRecord, StoreError> {
        request.validate()?;
        let key = RecordKey::new(user_id, video_id);

        let guard = self.locks.lock(&key).await;
        let existing = self.records.read().await.get(&key).cloned();
        let record = apply_sync(existing.as_ref(), request);
        self.records.write().await.insert(key, record.clone());
        drop(guard);
        self.locks.prune();

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::intervals::Interval;

    fn request(intervals: Vec<Interval>, total_duration: i64) -> SyncRequest {
        SyncRequest {
            new_intervals: intervals,
            last_watched_time: None,
            total_duration,
            force_progress: None,
        }
    }

    #[tokio::test]
    async fn get_unknown_record_is_none() {
        let store = MemoryProgressStore::new();
        assert_eq!(store.get("u1", "v1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn merge_creates_then_extends_record() {
        let store = MemoryProgressStore::new();
        store
            .merge_and_save("u1", "v1", &request(vec![Interval::new(0, 9)], 20))
            .await
            .unwrap();
        let record = store
            .merge_and_save("u1", "v1", &request(vec![Interval::new(10, 14)], 20))
            .await
            .unwrap();
        assert_eq!(record.watched_intervals, vec![Interval::new(0, 14)]);
        assert_eq!(record.progress, 75.0);
        assert_eq!(store.get("u1", "v1").await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn invalid_request_leaves_store_untouched() {
        let store = MemoryProgressStore::new();
        let err = store
            .merge_and_save("u1", "v1", &request(vec![Interval::new(0, 9), Interval::new(5, 1)], 20))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn unbounded_interval_end_is_rejected_without_panicking() {
        let store = MemoryProgressStore::new();
        let err = store
            .merge_and_save("u1", "v1", &request(vec![Interval::new(0, i64::MAX)], 100))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn records_are_scoped_per_user_and_video() {
        let store = MemoryProgressStore::new();
        store
            .merge_and_save("a:b", "c", &request(vec![Interval::new(0, 1)], 10))
            .await
            .unwrap();
        assert_eq!(store.get("a", "b:c").await.unwrap(), None);
        assert_eq!(store.get("a:b", "c").await.unwrap().map(|r| r.progress), Some(20.0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_merges_on_one_key_lose_nothing() {
        let store = Arc::new(MemoryProgressStore::new());
        let mut handles = Vec::new();
        for i in 0..50 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let start = i * 10;
                store
                    .merge_and_save("u1", "v1", &request(vec![Interval::new(start, start + 4)], 500))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let record = store.get("u1", "v1").await.unwrap().unwrap();
        assert_eq!(record.watched_intervals.len(), 50);
        assert_eq!(record.progress, 50.0);
    }
}
