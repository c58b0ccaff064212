use poem_openapi::{ApiResponse, Enum, Object, payload::Json};

use crate::{
    domain::{ProgressRecord, StorageKind, SyncRequest},
    intervals::Interval,
};

/// Closed range of watched seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Object)]
pub struct IntervalDto {
    pub start: i64,
    pub end: i64,
}

impl From<Interval> for IntervalDto {
    fn from(interval: Interval) -> Self {
        IntervalDto {
            start: interval.start,
            end: interval.end,
        }
    }
}

impl From<IntervalDto> for Interval {
    fn from(dto: IntervalDto) -> Self {
        Interval::new(dto.start, dto.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Enum)]
#[oai(rename_all = "lowercase")]
pub enum StorageTypeDto {
    Durable,
    Transient,
}

impl From<StorageKind> for StorageTypeDto {
    fn from(kind: StorageKind) -> Self {
        match kind {
            StorageKind::Durable => StorageTypeDto::Durable,
            StorageKind::Transient => StorageTypeDto::Transient,
        }
    }
}

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct SyncRequestDto {
    /// Intervals watched since the last report; need not be merged
    pub new_intervals: Vec<IntervalDto>,
    /// Playback cursor in seconds, overwrites the stored value when present
    pub last_watched_time: Option<i64>,
    /// Video duration in seconds, must be positive
    pub total_duration: i64,
    /// Stored verbatim as the record's progress when present
    pub force_progress: Option<f64>,
}

impl From<SyncRequestDto> for SyncRequest {
    fn from(dto: SyncRequestDto) -> Self {
        SyncRequest {
            new_intervals: dto.new_intervals.into_iter().map(Interval::from).collect(),
            last_watched_time: dto.last_watched_time,
            total_duration: dto.total_duration,
            force_progress: dto.force_progress,
        }
    }
}

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct ProgressDto {
    pub progress: f64,
    pub watched_intervals: Vec<IntervalDto>,
    pub last_watched_time: i64,
    pub total_duration: i64,
    pub storage_type: StorageTypeDto,
}

impl ProgressDto {
    pub fn from_record(record: ProgressRecord, kind: StorageKind) -> Self {
        ProgressDto {
            progress: record.progress,
            watched_intervals: record
                .watched_intervals
                .into_iter()
                .map(IntervalDto::from)
                .collect(),
            last_watched_time: record.last_watched_time,
            total_duration: record.total_duration,
            storage_type: kind.into(),
        }
    }
}

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct ErrorDto {
    /// Human-readable error message
    pub message: String,
    pub storage_type: Option<StorageTypeDto>,
}

impl From<String> for ErrorDto {
    fn from(message: String) -> Self {
        ErrorDto {
            message,
            storage_type: None,
        }
    }
}

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct ServiceInfoDto {
    pub message: String,
    pub storage_type: StorageTypeDto,
}

#[derive(ApiResponse)]
pub enum GetProgressResponse {
    /// Stored progress for the user and video
    #[oai(status = 200)]
    Ok(Json<ProgressDto>),

    /// Nothing recorded yet
    #[oai(status = 404)]
    NotFound(Json<ErrorDto>),

    #[oai(status = 500)]
    InternalError(Json<ErrorDto>),
}

#[derive(ApiResponse)]
#[oai(bad_request_handler = "malformed_sync_body")]
pub enum UpdateProgressResponse {
    /// Full record after the merge
    #[oai(status = 200)]
    Ok(Json<ProgressDto>),

    /// Malformed request, nothing was stored
    #[oai(status = 400)]
    BadRequest(Json<ErrorDto>),

    #[oai(status = 500)]
    InternalError(Json<ErrorDto>),
}

fn malformed_sync_body(err: poem::Error) -> UpdateProgressResponse {
    UpdateProgressResponse::BadRequest(Json(ErrorDto::from(format!(
        "Invalid request. newIntervals array and totalDuration are required: {}",
        err
    ))))
}

#[derive(ApiResponse)]
pub enum ServiceInfoResponse {
    #[oai(status = 200)]
    Ok(Json<ServiceInfoDto>),
}
