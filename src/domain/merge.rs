use crate::intervals::{self, Interval};

use super::models::{ProgressRecord, SyncRequest};

/// Folds one sync request into the stored record.
///
/// The request must already be validated. Progress never drops below the
/// stored value unless the client forces a value explicitly.
pub fn apply_sync(existing: Option<&ProgressRecord>, request: &SyncRequest) -> ProgressRecord {
    let base = existing
        .cloned()
        .unwrap_or_else(|| ProgressRecord::empty(request.total_duration));

    let watched_intervals = intervals::merge(
        base.watched_intervals
            .iter()
            .chain(request.new_intervals.iter())
            .copied(),
    );
    let computed = intervals::progress_percent(&watched_intervals, request.total_duration);

    let progress = match request.force_progress {
        Some(forced) => {
            tracing::debug!(forced, computed, "adopting client-forced progress");
            forced
        }
        None => {
            let kept = computed.max(base.progress);
            if kept > computed {
                tracing::debug!(
                    stored = base.progress,
                    computed,
                    "computed progress lower than stored, keeping stored value"
                );
            }
            kept
        }
    };

    tracing::debug!(
        intervals = watched_intervals.len(),
        covered = intervals::covered_seconds(&watched_intervals),
        progress,
        "merged sync request"
    );

    ProgressRecord {
        watched_intervals,
        progress,
        last_watched_time: request.last_watched_time.unwrap_or(base.last_watched_time),
        total_duration: request.total_duration,
    }
}

/// Convenience for callers holding a bare interval list rather than a record.
pub fn union(left: &[Interval], right: &[Interval]) -> Vec<Interval> {
    intervals::merge(left.iter().chain(right.iter()).copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(intervals: Vec<Interval>, total_duration: i64) -> SyncRequest {
        SyncRequest {
            new_intervals: intervals,
            last_watched_time: None,
            total_duration,
            force_progress: None,
        }
    }

    #[test]
    fn first_sync_creates_record_from_defaults() {
        let mut req = request(vec![Interval::new(10, 14), Interval::new(0, 4)], 20);
        req.last_watched_time = Some(14);
        let record = apply_sync(None, &req);
        assert_eq!(
            record.watched_intervals,
            vec![Interval::new(0, 4), Interval::new(10, 14)]
        );
        assert_eq!(record.progress, 50.0);
        assert_eq!(record.last_watched_time, 14);
        assert_eq!(record.total_duration, 20);
    }

    #[test]
    fn union_with_existing_intervals() {
        let existing = ProgressRecord {
            watched_intervals: vec![Interval::new(0, 9)],
            progress: 10.0,
            last_watched_time: 9,
            total_duration: 100,
        };
        let record = apply_sync(Some(&existing), &request(vec![Interval::new(11, 19)], 100));
        assert_eq!(record.watched_intervals, vec![Interval::new(0, 19)]);
        assert_eq!(record.progress, 20.0);
        assert_eq!(record.last_watched_time, 9, "absent lastWatchedTime is left alone");
    }

    #[test]
    fn stale_request_does_not_regress_progress() {
        // stored progress came from a longer duration estimate, recomputation yields 30
        let existing = ProgressRecord {
            watched_intervals: vec![Interval::new(0, 29)],
            progress: 40.0,
            last_watched_time: 29,
            total_duration: 100,
        };
        let record = apply_sync(Some(&existing), &request(vec![Interval::new(0, 5)], 100));
        assert_eq!(record.progress, 40.0);
    }

    #[test]
    fn forced_progress_is_stored_verbatim() {
        let existing = ProgressRecord {
            watched_intervals: vec![Interval::new(0, 29)],
            progress: 40.0,
            last_watched_time: 29,
            total_duration: 100,
        };
        let mut req = request(vec![], 100);
        req.force_progress = Some(35.5);
        assert_eq!(apply_sync(Some(&existing), &req).progress, 35.5);
        req.force_progress = Some(61.25);
        assert_eq!(apply_sync(Some(&existing), &req).progress, 61.25);
    }

    #[test]
    fn last_watched_time_is_last_write_wins() {
        let existing = ProgressRecord {
            watched_intervals: vec![Interval::new(0, 59)],
            progress: 60.0,
            last_watched_time: 59,
            total_duration: 100,
        };
        let mut req = request(vec![], 100);
        req.last_watched_time = Some(3);
        assert_eq!(apply_sync(Some(&existing), &req).last_watched_time, 3);
    }

    #[test]
    fn union_helper_normalizes() {
        let merged = union(&[Interval::new(0, 3)], &[Interval::new(5, 8), Interval::new(20, 21)]);
        assert_eq!(merged, vec![Interval::new(0, 8), Interval::new(20, 21)]);
    }
}
