use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use super::cache::{CachedProgress, LocalProgressCache};

#[derive(Debug, Default)]
struct PendingWrite {
    snapshot: Option<CachedProgress>,
    flush_scheduled: bool,
}

/// Coalesces cache writes for one (user, video).
///
/// The first write in a quiet period schedules a flush `window` later; writes
/// arriving before it fires only replace the pending snapshot. `flush` and
/// `write_now` bypass the delay. Writes happen under the pending lock so an
/// older snapshot can never land after a newer one.
#[derive(Debug)]
pub struct DebouncedCacheWriter {
    cache: Arc<LocalProgressCache>,
    user_id: String,
    video_id: String,
    window: Duration,
    pending: Arc<Mutex<PendingWrite>>,
}

fn lock(pending: &Mutex<PendingWrite>) -> MutexGuard<'_, PendingWrite> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

fn store(cache: &LocalProgressCache, user_id: &str, video_id: &str, snapshot: &CachedProgress) {
    if let Err(e) = cache.put(user_id, video_id, snapshot) {
        tracing::warn!(%user_id, %video_id, error = %e, "failed to save progress to local cache");
    }
}

impl DebouncedCacheWriter {
    pub fn new(
        cache: Arc<LocalProgressCache>,
        user_id: impl Into<String>,
        video_id: impl Into<String>,
        window: Duration,
    ) -> Self {
        DebouncedCacheWriter {
            cache,
            user_id: user_id.into(),
            video_id: video_id.into(),
            window,
            pending: Arc::new(Mutex::new(PendingWrite::default())),
        }
    }

    /// Queues `snapshot`; must be called from within a tokio runtime.
    pub fn schedule(&self, snapshot: CachedProgress) {
        let mut pending = lock(&self.pending);
        pending.snapshot = Some(snapshot);
        if pending.flush_scheduled {
            return;
        }
        pending.flush_scheduled = true;

        let pending_slot = Arc::clone(&self.pending);
        let cache = Arc::clone(&self.cache);
        let user_id = self.user_id.clone();
        let video_id = self.video_id.clone();
        let window = self.window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let mut pending = lock(&pending_slot);
            pending.flush_scheduled = false;
            if let Some(snapshot) = pending.snapshot.take() {
                store(&cache, &user_id, &video_id, &snapshot);
            }
        });
    }

    /// Writes `snapshot` immediately, superseding anything pending.
    pub fn write_now(&self, snapshot: &CachedProgress) {
        let mut pending = lock(&self.pending);
        pending.snapshot = None;
        store(&self.cache, &self.user_id, &self.video_id, snapshot);
    }

    /// Writes the pending snapshot, if any, without waiting for the window.
    pub fn flush(&self) {
        let mut pending = lock(&self.pending);
        if let Some(snapshot) = pending.snapshot.take() {
            store(&self.cache, &self.user_id, &self.video_id, &snapshot);
        }
    }

    pub fn has_pending(&self) -> bool {
        lock(&self.pending).snapshot.is_some()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::intervals::Interval;

    fn snapshot(end: i64) -> CachedProgress {
        CachedProgress {
            watched_intervals: vec![Interval::new(0, end)],
            progress: (end + 1) as f64,
            last_watched_time: end,
            total_duration: 100,
            written_at: Utc::now(),
        }
    }

    fn writer(dir: &tempfile::TempDir) -> (Arc<LocalProgressCache>, DebouncedCacheWriter) {
        let cache = Arc::new(LocalProgressCache::open(dir.path().join("progress.json")));
        let writer =
            DebouncedCacheWriter::new(Arc::clone(&cache), "u1", "v1", Duration::from_millis(500));
        (cache, writer)
    }

    #[tokio::test(start_paused = true)]
    async fn coalesces_writes_within_window() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, writer) = writer(&dir);

        writer.schedule(snapshot(1));
        writer.schedule(snapshot(2));
        writer.schedule(snapshot(3));
        assert_eq!(cache.get("u1", "v1"), None);
        assert!(writer.has_pending());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(cache.get("u1", "v1").map(|c| c.last_watched_time), Some(3));
        assert!(!writer.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn flush_writes_pending_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, writer) = writer(&dir);

        writer.schedule(snapshot(7));
        writer.flush();
        assert_eq!(cache.get("u1", "v1").map(|c| c.last_watched_time), Some(7));

        // the scheduled flush finds nothing left and a later write starts a new window
        tokio::time::sleep(Duration::from_millis(600)).await;
        writer.schedule(snapshot(8));
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(cache.get("u1", "v1").map(|c| c.last_watched_time), Some(8));
    }

    #[tokio::test(start_paused = true)]
    async fn write_now_supersedes_pending() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, writer) = writer(&dir);

        writer.schedule(snapshot(4));
        writer.write_now(&snapshot(9));
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(cache.get("u1", "v1").map(|c| c.last_watched_time), Some(9));
    }
}
