//! Whole-second watched intervals and the algebra over them.
//!
//! An [`Interval`] is a closed range `[start, end]` of playback seconds. A
//! normalized set is sorted by `start` and leaves at least a two second gap
//! between neighbours: [`merge`] joins anything that overlaps or sits at most
//! one second away. Every consumer in this crate works on normalized sets.

use serde::{Deserialize, Serialize};

/// Two intervals whose boundaries are this close (or overlap) are joined.
const ADJACENCY_SLACK: i64 = 1;

/// Largest playback second accepted anywhere (roughly 31 years of video).
pub const MAX_SECOND: i64 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    pub start: i64,
    pub end: i64,
}

impl Interval {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// A one second interval `[second, second]`.
    pub fn single(second: i64) -> Self {
        Self::new(second, second)
    }

    pub fn is_valid(&self) -> bool {
        self.start >= 0 && self.start <= self.end
    }

    /// Number of whole seconds covered, both ends inclusive.
    pub fn seconds(&self) -> i64 {
        self.end.saturating_sub(self.start).saturating_add(1)
    }

    pub fn contains(&self, second: i64) -> bool {
        self.start <= second && second <= self.end
    }
}

/// Normalizes a collection of intervals.
///
/// Malformed entries (negative start, `start > end`) are dropped. The rest is
/// sorted by `start` and swept once, extending the current run whenever the
/// next interval starts at most one second after it ends.
pub fn merge<I>(intervals: I) -> Vec<Interval>
where
    I: IntoIterator<Item = Interval>,
{
    let mut sorted: Vec<Interval> = intervals.into_iter().filter(Interval::is_valid).collect();
    sorted.sort_by_key(|interval| (interval.start, interval.end));

    let mut merged: Vec<Interval> = Vec::with_capacity(sorted.len());
    for interval in sorted {
        match merged.last_mut() {
            Some(run) if interval.start <= run.end.saturating_add(ADJACENCY_SLACK) => {
                run.end = run.end.max(interval.end);
            }
            _ => merged.push(interval),
        }
    }
    merged
}

/// Total seconds covered by a normalized set. Overlapping input is counted twice.
pub fn covered_seconds(intervals: &[Interval]) -> i64 {
    intervals
        .iter()
        .filter(|interval| interval.is_valid())
        .map(Interval::seconds)
        .fold(0, i64::saturating_add)
}

/// Percentage of `total_duration` covered by `intervals`, rounded to two
/// decimals and capped at 100.
pub fn progress_percent(intervals: &[Interval], total_duration: i64) -> f64 {
    if total_duration <= 0 {
        return 0.0;
    }
    let covered = covered_seconds(intervals);
    if covered <= 0 {
        return 0.0;
    }
    let percent = covered as f64 / total_duration as f64 * 100.0;
    round_percent(percent).min(100.0)
}

/// Rounds a percentage to two decimal places.
pub fn round_percent(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    (value * 100.0).round() / 100.0
}

pub fn is_watched(second: i64, intervals: &[Interval]) -> bool {
    intervals
        .iter()
        .filter(|interval| interval.is_valid())
        .any(|interval| interval.contains(second))
}
