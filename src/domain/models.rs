// Domain models shared by the server, its stores and the client tracker

use serde::{Deserialize, Serialize};

use crate::intervals::{Interval, MAX_SECOND};

/// Authoritative watch state for one (user, video) pair.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgressRecord {
    /// Normalized set of watched seconds
    pub watched_intervals: Vec<Interval>,
    /// 0 - 100, two decimals
    pub progress: f64,
    /// Last known playback cursor, in seconds
    pub last_watched_time: i64,
    pub total_duration: i64,
}

impl ProgressRecord {
    /// Zeroed record used when nothing has been stored yet.
    pub fn empty(total_duration: i64) -> Self {
        Self {
            total_duration,
            ..Self::default()
        }
    }
}

/// One synchronization attempt from a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// Not required to be normalized
    pub new_intervals: Vec<Interval>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_watched_time: Option<i64>,
    pub total_duration: i64,
    /// When present the server stores this value verbatim as `progress`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_progress: Option<f64>,
}

impl SyncRequest {
    /// Checks the whole request before anything is mutated.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some((index, interval)) = self
            .new_intervals
            .iter()
            .enumerate()
            .find(|(_, interval)| !interval.is_valid())
        {
            return Err(ValidationError::MalformedInterval {
                index,
                start: interval.start,
                end: interval.end,
            });
        }
        if let Some((index, interval)) = self
            .new_intervals
            .iter()
            .enumerate()
            .find(|(_, interval)| interval.end > MAX_SECOND)
        {
            return Err(ValidationError::SecondOutOfRange {
                field: format!("newIntervals[{}].end", index),
                value: interval.end,
            });
        }
        if self.total_duration <= 0 {
            return Err(ValidationError::NonPositiveDuration(self.total_duration));
        }
        if self.total_duration > MAX_SECOND {
            return Err(ValidationError::SecondOutOfRange {
                field: "totalDuration".into(),
                value: self.total_duration,
            });
        }
        if let Some(time) = self.last_watched_time.filter(|time| *time < 0) {
            return Err(ValidationError::NegativeLastWatchedTime(time));
        }
        if let Some(time) = self.last_watched_time.filter(|time| *time > MAX_SECOND) {
            return Err(ValidationError::SecondOutOfRange {
                field: "lastWatchedTime".into(),
                value: time,
            });
        }
        if let Some(forced) = self
            .force_progress
            .filter(|forced| !(forced.is_finite() && (0.0..=100.0).contains(forced)))
        {
            return Err(ValidationError::ForcedProgressOutOfRange(forced));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("interval #{index} is malformed (start={start}, end={end})")]
    MalformedInterval { index: usize, start: i64, end: i64 },
    #[error("{field} exceeds {max} seconds, got {value}", max = MAX_SECOND)]
    SecondOutOfRange { field: String, value: i64 },
    #[error("totalDuration must be greater than zero, got {0}")]
    NonPositiveDuration(i64),
    #[error("lastWatchedTime must not be negative, got {0}")]
    NegativeLastWatchedTime(i64),
    #[error("forceProgress must be a number between 0 and 100, got {0}")]
    ForcedProgressOutOfRange(f64),
}

/// Which kind of backend answered a request. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Durable,
    Transient,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Durable => "durable",
            StorageKind::Transient => "transient",
        }
    }
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
    fn accepts_well_formed_request() {
        let req = request(vec![Interval::new(0, 4), Interval::single(9)], 60);
        assert_eq!(req.validate(), Ok(()));
    }

    #[test]
    fn rejects_malformed_interval_with_its_position() {
        let req = request(vec![Interval::new(0, 4), Interval::new(8, 3)], 60);
        assert_eq!(
            req.validate(),
            Err(ValidationError::MalformedInterval { index: 1, start: 8, end: 3 })
        );
        let req = request(vec![Interval::new(-1, 3)], 60);
        assert!(matches!(req.validate(), Err(ValidationError::MalformedInterval { index: 0, .. })));
    }

    #[test]
    fn rejects_missing_duration_and_bad_forced_progress() {
        assert_eq!(
            request(vec![], 0).validate(),
            Err(ValidationError::NonPositiveDuration(0))
        );
        let mut req = request(vec![], 10);
        req.force_progress = Some(f64::NAN);
        assert!(req.validate().is_err());
        req.force_progress = Some(100.5);
        assert!(req.validate().is_err());
        req.force_progress = Some(72.25);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn rejects_seconds_beyond_the_playback_bound() {
        let req = request(vec![Interval::new(0, 9), Interval::new(0, i64::MAX)], 100);
        assert_eq!(
            req.validate(),
            Err(ValidationError::SecondOutOfRange {
                field: "newIntervals[1].end".into(),
                value: i64::MAX,
            })
        );
        assert!(request(vec![Interval::new(0, MAX_SECOND)], 100).validate().is_ok());
        assert!(matches!(
            request(vec![], MAX_SECOND + 1).validate(),
            Err(ValidationError::SecondOutOfRange { .. })
        ));
        let mut req = request(vec![], 100);
        req.last_watched_time = Some(i64::MAX);
        assert!(matches!(req.validate(), Err(ValidationError::SecondOutOfRange { .. })));
    }

    #[test]
    fn record_uses_camel_case_on_the_wire() {
        let record = ProgressRecord {
            watched_intervals: vec![Interval::new(0, 9)],
            progress: 50.0,
            last_watched_time: 9,
            total_duration: 20,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["watchedIntervals"][0]["end"], 9);
        assert_eq!(json["lastWatchedTime"], 9);
        assert_eq!(json["totalDuration"], 20);
    }
}
