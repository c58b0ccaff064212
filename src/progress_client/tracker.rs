//! Per-session playback tracker.
//!
//! The host player feeds playback events into a [`ProgressTracker`]: position
//! samples, play, pause, duration changes and session end. The tracker turns
//! them into a normalized working set of watched intervals, writes snapshots
//! through to the [`LocalProgressCache`] and reconciles with the server.
//!
//! Two rules hold for the whole session:
//!
//! - progress never goes down: every value passes through
//!   `SessionState::commit_progress`, which keeps the highest value seen;
//! - at most one sync request is in flight; a sync started while another is
//!   outstanding returns [`SyncOutcome::InFlight`] without touching the network.
//!   Pause and session end wait for the outstanding one instead of dropping
//!   their own. In-flight requests are never cancelled.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{
    sync::{Mutex, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};

use super::{
    ProgressTransport,
    cache::{CachedProgress, LocalProgressCache},
    debounce::DebouncedCacheWriter,
};
use crate::{
    domain::{ProgressRecord, SyncRequest, merge::union},
    intervals::{self, Interval},
};

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Minimum wall time between two handled position samples
    pub sample_interval: Duration,
    /// Period of background syncs while playing
    pub sync_period: Duration,
    /// Coalescing window for local cache writes
    pub cache_debounce: Duration,
    /// Delay before re-submitting a forced progress value
    pub resubmit_delay: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            sample_interval: Duration::from_millis(200),
            sync_period: Duration::from_secs(5),
            cache_debounce: Duration::from_millis(500),
            resubmit_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerPhase {
    Idle,
    Loading,
    Ready,
    Playing,
    Paused,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Another sync was outstanding; nothing was sent
    InFlight,
    /// No intervals and no known duration
    NothingToReport,
    /// Duration unknown; intervals kept locally only
    Deferred,
    Synced { progress: f64 },
    /// Network or server failure; local progress kept
    Failed,
}

/// Read-only view of a session for display.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub phase: TrackerPhase,
    pub watched_intervals: Vec<Interval>,
    pub open_interval: Option<Interval>,
    pub progress: f64,
    pub last_watched_time: i64,
    pub total_duration: i64,
    pub last_error: Option<String>,
}

#[derive(Debug)]
struct SessionState {
    phase: TrackerPhase,
    working: Vec<Interval>,
    open: Option<Interval>,
    /// Highest progress seen this session; never decreases
    progress: f64,
    last_watched_time: i64,
    total_duration: i64,
    last_sample_at: Option<Instant>,
    last_error: Option<String>,
    /// Dropping or signalling this stops the periodic sync between ticks
    sync_timer: Option<watch::Sender<bool>>,
    ended: bool,
}

impl SessionState {
    fn new() -> Self {
        SessionState {
            phase: TrackerPhase::Idle,
            working: Vec::new(),
            open: None,
            progress: 0.0,
            last_watched_time: 0,
            total_duration: 0,
            last_sample_at: None,
            last_error: None,
            sync_timer: None,
            ended: false,
        }
    }

    fn seed(&mut self, record: ProgressRecord) {
        self.working = intervals::merge(record.watched_intervals);
        self.open = None;
        self.last_watched_time = record.last_watched_time;
        self.total_duration = self.total_duration.max(record.total_duration);
        self.commit_progress(record.progress);
        self.recompute_progress();
    }

    fn commit_progress(&mut self, candidate: f64) -> f64 {
        if candidate.is_finite() && candidate > self.progress {
            self.progress = candidate.min(100.0);
        }
        self.progress
    }

    fn recompute_progress(&mut self) -> f64 {
        if self.total_duration > 0 {
            let computed = intervals::progress_percent(&self.working, self.total_duration);
            self.commit_progress(computed)
        } else {
            self.progress
        }
    }

    fn fold_open(&mut self) {
        if let Some(open) = self.open {
            self.working = intervals::merge(self.working.iter().copied().chain([open]));
        }
        self.recompute_progress();
    }

    /// Applies one whole-second sample. Returns whether the working set changed.
    fn record_second(&mut self, second: i64) -> bool {
        self.last_watched_time = second;
        let already_open = self.open.is_some_and(|open| open.contains(second));
        if already_open || intervals::is_watched(second, &self.working) {
            return false;
        }
        match self.open.as_mut() {
            Some(open) if second == open.end + 1 => open.end = second,
            _ => {
                if let Some(open) = self.open {
                    tracing::debug!(closed = ?open, second, "seek detected, starting new interval");
                }
                self.open = Some(Interval::single(second));
            }
        }
        self.fold_open();
        true
    }

    fn close_open(&mut self) {
        self.fold_open();
        self.open = None;
    }

    fn disarm_timer(&mut self) {
        if let Some(stop) = self.sync_timer.take() {
            let _ = stop.send(true);
        }
    }

    fn record(&self) -> ProgressRecord {
        ProgressRecord {
            watched_intervals: self.working.clone(),
            progress: self.progress,
            last_watched_time: self.last_watched_time,
            total_duration: self.total_duration,
        }
    }

    fn cached(&self) -> CachedProgress {
        CachedProgress::from_record(&self.record(), Utc::now())
    }

    fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            phase: self.phase,
            watched_intervals: self.working.clone(),
            open_interval: self.open,
            progress: self.progress,
            last_watched_time: self.last_watched_time,
            total_duration: self.total_duration,
            last_error: self.last_error.clone(),
        }
    }
}

/// Floors a player position to whole seconds; rejects NaN, infinities,
/// negatives and anything past [`intervals::MAX_SECOND`].
fn to_second(position: f64) -> Option<i64> {
    (position.is_finite() && (0.0..=intervals::MAX_SECOND as f64).contains(&position))
        .then(|| position.floor() as i64)
}

pub struct ProgressTracker<T: ProgressTransport> {
    user_id: String,
    video_id: String,
    transport: Arc<T>,
    cache: Arc<LocalProgressCache>,
    cache_writer: DebouncedCacheWriter,
    config: TrackerConfig,
    state: Mutex<SessionState>,
    /// Held for the whole round trip of a sync
    flight: Arc<Mutex<()>>,
}

impl<T: ProgressTransport> ProgressTracker<T> {
    pub fn new(
        user_id: impl Into<String>,
        video_id: impl Into<String>,
        transport: Arc<T>,
        cache: Arc<LocalProgressCache>,
        config: TrackerConfig,
    ) -> Arc<Self> {
        let user_id = user_id.into();
        let video_id = video_id.into();
        let cache_writer = DebouncedCacheWriter::new(
            Arc::clone(&cache),
            user_id.clone(),
            video_id.clone(),
            config.cache_debounce,
        );
        Arc::new(ProgressTracker {
            user_id,
            video_id,
            transport,
            cache,
            cache_writer,
            config,
            state: Mutex::new(SessionState::new()),
            flight: Arc::new(Mutex::new(())),
        })
    }

    pub async fn snapshot(&self) -> ProgressSnapshot {
        self.state.lock().await.snapshot()
    }

    pub fn is_syncing(&self) -> bool {
        self.flight.try_lock().is_err()
    }

    /// Seeds the session from the local cache and the server.
    ///
    /// The higher progress wins, and intervals only the cache knows about are
    /// never dropped: when the cache has a higher value or extra intervals,
    /// both sets are unioned and the result is pushed back in the background.
    /// A failed fetch falls back to the cache (or zeros) and is
    /// recorded as the session's last error.
    #[tracing::instrument(level = "debug", skip(self), fields(user_id = %self.user_id, video_id = %self.video_id))]
    pub async fn load(&self) -> ProgressSnapshot {
        self.state.lock().await.phase = TrackerPhase::Loading;

        let cached = self.cache.get(&self.user_id, &self.video_id);
        let fetched = self.transport.fetch(&self.user_id, &self.video_id).await;

        let mut state = self.state.lock().await;
        match fetched {
            Ok(server) => {
                let server_known = server.is_some();
                let server = server.unwrap_or_default();
                let seed = match cached {
                    Some(local) => self.reconcile_with_cache(server, server_known, local),
                    None => server,
                };
                state.seed(seed);
                state.last_error = None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to fetch progress, using local data");
                state.last_error = Some(e.to_string());
                if let Some(local) = cached {
                    state.seed(local.to_record());
                }
            }
        }
        state.phase = TrackerPhase::Ready;
        self.cache_writer.write_now(&state.cached());
        state.snapshot()
    }

    fn reconcile_with_cache(
        &self,
        server: ProgressRecord,
        server_known: bool,
        local: CachedProgress,
    ) -> ProgressRecord {
        let watched_intervals = union(&server.watched_intervals, &local.watched_intervals);
        let local_wins = local.progress > server.progress;
        let local_adds = intervals::covered_seconds(&watched_intervals)
            > intervals::covered_seconds(&server.watched_intervals);
        if !local_wins && !local_adds {
            return server;
        }
        tracing::info!(
            local = local.progress,
            server = server.progress,
            local_adds,
            "local cache holds newer data, merging with server data"
        );
        let merged = ProgressRecord {
            watched_intervals,
            progress: server.progress.max(local.progress),
            last_watched_time: if server_known {
                server.last_watched_time
            } else {
                local.last_watched_time
            },
            total_duration: server.total_duration.max(local.total_duration),
        };
        self.push_in_background(&merged);
        merged
    }

    fn push_in_background(&self, record: &ProgressRecord) {
        if record.total_duration <= 0 {
            return;
        }
        let request = SyncRequest {
            new_intervals: record.watched_intervals.clone(),
            last_watched_time: Some(record.last_watched_time),
            total_duration: record.total_duration,
            force_progress: None,
        };
        let transport = Arc::clone(&self.transport);
        let user_id = self.user_id.clone();
        let video_id = self.video_id.clone();
        tokio::spawn(async move {
            if let Err(e) = transport.push(&user_id, &video_id, &request).await {
                tracing::warn!(error = %e, "failed to push merged local progress");
            }
        });
    }

    /// Reports the media duration in seconds; non-positive or non-finite values are ignored.
    pub async fn on_duration_change(&self, duration: f64) {
        let Some(seconds) = to_second(duration).filter(|s| *s > 0) else {
            return;
        };
        let mut state = self.state.lock().await;
        if state.ended || state.total_duration == seconds {
            return;
        }
        tracing::debug!(duration = seconds, "video duration set");
        state.total_duration = seconds;
        state.recompute_progress();
        self.cache_writer.schedule(state.cached());
    }

    /// Position sample from the player, throttled to one per `sample_interval`.
    pub async fn on_time_update(&self, position: f64) {
        let Some(second) = to_second(position) else {
            return;
        };
        let now = Instant::now();
        let mut state = self.state.lock().await;
        if state.ended {
            return;
        }
        if state
            .last_sample_at
            .is_some_and(|last| now.duration_since(last) < self.config.sample_interval)
        {
            return;
        }
        state.last_sample_at = Some(now);
        if state.record_second(second) {
            self.cache_writer.schedule(state.cached());
        }
    }

    /// Starts (or continues) an interval at `position` and arms the periodic sync.
    pub async fn on_play(self: &Arc<Self>, position: f64) {
        let mut state = self.state.lock().await;
        if state.ended {
            return;
        }
        state.phase = TrackerPhase::Playing;
        if let Some(second) = to_second(position) {
            state.last_sample_at = Some(Instant::now());
            if state.record_second(second) {
                self.cache_writer.schedule(state.cached());
            }
        }
        state.disarm_timer();
        state.sync_timer = Some(self.spawn_sync_timer());
        tracing::debug!(position, "playback started");
    }

    fn spawn_sync_timer(self: &Arc<Self>) -> watch::Sender<bool> {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let tracker = Arc::downgrade(self);
        let period = self.config.sync_period;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {}
                }
                let Some(tracker) = tracker.upgrade() else {
                    break;
                };
                tracker.sync_with_server(None).await;
            }
            tracing::debug!("periodic sync stopped");
        });
        stop_tx
    }

    /// Closes the open interval, disarms the periodic sync and syncs. If a
    /// sync is outstanding, this one runs as soon as it completes.
    pub async fn on_pause(&self, position: f64) -> SyncOutcome {
        {
            let mut state = self.state.lock().await;
            if let Some(second) = to_second(position) {
                state.last_watched_time = second;
            }
            state.close_open();
            state.disarm_timer();
            if !state.ended {
                state.phase = TrackerPhase::Paused;
            }
            self.cache_writer.schedule(state.cached());
        }
        tracing::debug!(position, "playback paused");
        let _flight = match self.flight.try_lock() {
            Ok(flight) => flight,
            Err(_) => {
                tracing::debug!("waiting for outstanding sync before pause sync");
                self.flight.lock().await
            }
        };
        self.sync_in_flight(Some(position)).await
    }

    /// Tears the session down: timers stop, the pending cache write is
    /// flushed and a final sync runs detached. The returned handle may be
    /// ignored; later responses only reach the cache.
    pub async fn end_session(&self) -> JoinHandle<SyncOutcome> {
        let request = {
            let mut state = self.state.lock().await;
            state.disarm_timer();
            state.close_open();
            state.ended = true;
            state.phase = TrackerPhase::Ready;
            self.cache_writer.flush();
            self.cache_writer.write_now(&state.cached());
            let unsent = if state.working.is_empty() {
                SyncOutcome::NothingToReport
            } else {
                SyncOutcome::Deferred
            };
            Self::request_from(&state).ok_or(unsent)
        };

        let transport = Arc::clone(&self.transport);
        let flight = Arc::clone(&self.flight);
        let cache = Arc::clone(&self.cache);
        let user_id = self.user_id.clone();
        let video_id = self.video_id.clone();
        tokio::spawn(async move {
            let request = match request {
                Ok(request) => request,
                Err(unsent) => return unsent,
            };
            let _flight = flight.lock().await;
            match transport.push(&user_id, &video_id, &request).await {
                Ok(record) => {
                    let mut cached = CachedProgress::from_record(&record, Utc::now());
                    cached.progress = cached.progress.max(request.force_progress.unwrap_or(0.0));
                    if let Some(local) = cache.get(&user_id, &video_id) {
                        cached.progress = cached.progress.max(local.progress);
                        cached.last_watched_time = local.last_watched_time;
                    }
                    if let Err(e) = cache.put(&user_id, &video_id, &cached) {
                        tracing::debug!(error = %e, "final cache write failed");
                    }
                    SyncOutcome::Synced { progress: cached.progress }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "final sync failed");
                    SyncOutcome::Failed
                }
            }
        })
    }

    /// `None` while the duration is unknown; the server rejects such requests.
    fn request_from(state: &SessionState) -> Option<SyncRequest> {
        if state.total_duration <= 0 {
            return None;
        }
        Some(SyncRequest {
            new_intervals: state.working.clone(),
            last_watched_time: Some(state.last_watched_time),
            total_duration: state.total_duration,
            force_progress: None,
        })
    }

    /// One synchronization round trip.
    ///
    /// The server's progress and the session's are combined by maximum. If
    /// the server reports less than the session held before the request, the
    /// higher value is re-submitted with `forceProgress` after
    /// `resubmit_delay`. Failures are recorded and leave progress untouched.
    #[tracing::instrument(level = "debug", skip(self), fields(user_id = %self.user_id, video_id = %self.video_id))]
    pub async fn sync_with_server(&self, position: Option<f64>) -> SyncOutcome {
        let Ok(_flight) = self.flight.try_lock() else {
            tracing::debug!("sync already in progress, skipping");
            return SyncOutcome::InFlight;
        };
        self.sync_in_flight(position).await
    }

    /// Body of a sync; the caller holds `flight`.
    async fn sync_in_flight(&self, position: Option<f64>) -> SyncOutcome {
        let (request, pre_sync_progress) = {
            let mut state = self.state.lock().await;
            if let Some(second) = position.and_then(to_second) {
                state.last_watched_time = second;
            }
            state.fold_open();
            if state.working.is_empty() && state.total_duration <= 0 {
                return SyncOutcome::NothingToReport;
            }
            match Self::request_from(&state) {
                Some(request) => (request, state.progress),
                None => {
                    tracing::debug!("duration unknown, keeping progress locally");
                    self.cache_writer.schedule(state.cached());
                    return SyncOutcome::Deferred;
                }
            }
        };

        let result = self
            .transport
            .push(&self.user_id, &self.video_id, &request)
            .await;

        let mut state = self.state.lock().await;
        match result {
            Ok(record) => {
                let server_progress = record.progress;
                if state.ended {
                    // late response after teardown: keep it for the next session only
                    let mut cached = state.cached();
                    cached.watched_intervals =
                        union(&cached.watched_intervals, &record.watched_intervals);
                    cached.progress = cached.progress.max(server_progress);
                    self.cache_writer.write_now(&cached);
                    return SyncOutcome::Synced { progress: cached.progress };
                }

                state.working = union(&state.working, &record.watched_intervals);
                state.total_duration = state.total_duration.max(record.total_duration);
                state.commit_progress(server_progress.max(pre_sync_progress));
                state.last_error = None;
                self.cache_writer.write_now(&state.cached());

                if server_progress < pre_sync_progress {
                    tracing::info!(
                        server = server_progress,
                        local = state.progress,
                        "server returned lower progress, keeping local value"
                    );
                    self.schedule_forced_resubmit(SyncRequest {
                        force_progress: Some(state.progress),
                        ..request
                    });
                }
                SyncOutcome::Synced { progress: state.progress }
            }
            Err(e) => {
                tracing::warn!(error = %e, transient = e.is_transient(), "failed to sync progress with server");
                state.last_error = Some(e.to_string());
                self.cache_writer.write_now(&state.cached());
                SyncOutcome::Failed
            }
        }
    }

    fn schedule_forced_resubmit(&self, request: SyncRequest) {
        let transport = Arc::clone(&self.transport);
        let flight = Arc::clone(&self.flight);
        let user_id = self.user_id.clone();
        let video_id = self.video_id.clone();
        let delay = self.config.resubmit_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Ok(_flight) = flight.try_lock() else {
                tracing::debug!("sync in progress, dropping forced resubmission");
                return;
            };
            match transport.push(&user_id, &video_id, &request).await {
                Ok(record) => tracing::debug!(progress = record.progress, "forced progress accepted"),
                Err(e) => tracing::warn!(error = %e, "error re-syncing higher progress"),
            }
        });
    }
}
