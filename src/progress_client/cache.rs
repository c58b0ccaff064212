//! Device-local progress cache.
//!
//! Keeps the last snapshot written per (user, video) in one JSON file so a
//! session can survive restarts and offline periods. Reads never fail: a
//! missing file, an unreadable file or a corrupt entry all mean "nothing
//! cached". The number of entries is bounded; the least recently written
//! ones are evicted first.

use std::{
    fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{domain::ProgressRecord, intervals::Interval};

pub const DEFAULT_CACHE_CAPACITY: usize = 20;

/// Snapshot stored for one (user, video).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedProgress {
    pub watched_intervals: Vec<Interval>,
    pub progress: f64,
    pub last_watched_time: i64,
    pub total_duration: i64,
    pub written_at: DateTime<Utc>,
}

impl CachedProgress {
    pub fn from_record(record: &ProgressRecord, written_at: DateTime<Utc>) -> Self {
        CachedProgress {
            watched_intervals: record.watched_intervals.clone(),
            progress: record.progress,
            last_watched_time: record.last_watched_time,
            total_duration: record.total_duration,
            written_at,
        }
    }

    pub fn to_record(&self) -> ProgressRecord {
        ProgressRecord {
            watched_intervals: self.watched_intervals.clone(),
            progress: self.progress,
            last_watched_time: self.last_watched_time,
            total_duration: self.total_duration,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache io error: {0}")]
    Io(#[from] io::Error),
    #[error("cache encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// `%` and `_` are escaped in both ids so the separator stays unambiguous.
fn cache_key(user_id: &str, video_id: &str) -> String {
    fn escape(id: &str) -> String {
        id.replace('%', "%25").replace('_', "%5F")
    }
    format!("video_progress_{}_{}", escape(user_id), escape(video_id))
}

#[derive(Debug)]
pub struct LocalProgressCache {
    path: PathBuf,
    capacity: usize,
    io_lock: Mutex<()>,
}

impl LocalProgressCache {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::with_capacity(path, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(path: impl Into<PathBuf>, capacity: usize) -> Self {
        LocalProgressCache {
            path: path.into(),
            capacity: capacity.max(1),
            io_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last snapshot for the pair, if one exists and is readable.
    pub fn get(&self, user_id: &str, video_id: &str) -> Option<CachedProgress> {
        let _guard = self.io_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let key = cache_key(user_id, video_id);
        let entry = self.read_entries().remove(&key)?;
        match serde_json::from_value::<CachedProgress>(entry) {
            Ok(cached) => Some(cached),
            Err(e) => {
                tracing::warn!(%key, error = %e, "ignoring corrupt cached progress");
                None
            }
        }
    }

    /// Stores `snapshot`, evicting the oldest entries beyond capacity.
    pub fn put(&self, user_id: &str, video_id: &str, snapshot: &CachedProgress) -> Result<(), CacheError> {
        let _guard = self.io_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.read_entries();
        entries.insert(cache_key(user_id, video_id), serde_json::to_value(snapshot)?);
        let entries = self.evict(entries);
        self.write_entries(&entries)?;
        tracing::debug!(%user_id, %video_id, progress = snapshot.progress, "saved progress to local cache");
        Ok(())
    }

    pub fn len(&self) -> usize {
        let _guard = self.io_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_entries(&self) -> Map<String, Value> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Map::new(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to read local progress cache");
                return Map::new();
            }
        };
        match serde_json::from_str::<Map<String, Value>>(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "local progress cache is corrupt, starting empty");
                Map::new()
            }
        }
    }

    fn evict(&self, entries: Map<String, Value>) -> Map<String, Value> {
        if entries.len() <= self.capacity {
            return entries;
        }
        let mut dated: Vec<(Option<DateTime<Utc>>, String, Value)> = entries
            .into_iter()
            .map(|(key, value)| {
                let written_at = value
                    .get("writtenAt")
                    .and_then(|v| serde_json::from_value::<DateTime<Utc>>(v.clone()).ok());
                (written_at, key, value)
            })
            .collect();
        // newest first; undated entries sort last and go first
        dated.sort_by(|a, b| b.0.cmp(&a.0));
        let evicted = dated.len() - self.capacity;
        tracing::debug!(evicted, "evicting stale cached progress entries");
        dated
            .into_iter()
            .take(self.capacity)
            .map(|(_, key, value)| (key, value))
            .collect()
    }

    fn write_entries(&self, entries: &Map<String, Value>) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec(entries)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
