// Client side: HTTP client for the progress API, local cache and the playback tracker

pub mod cache;
pub mod debounce;
pub mod tracker;

use reqwest::{StatusCode, Url};
use serde::Deserialize;

use crate::domain::{ProgressRecord, StorageKind, SyncRequest};

pub use cache::{CachedProgress, LocalProgressCache};
pub use tracker::{ProgressSnapshot, ProgressTracker, SyncOutcome, TrackerConfig, TrackerPhase};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("too many requests")]
    RateLimited,
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid base url: {0}")]
    InvalidUrl(String),
}

impl ClientError {
    /// Worth retrying later without dropping local progress.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Network(_) | ClientError::RateLimited => true,
            ClientError::Status { status, .. } => *status >= 500,
            ClientError::Decode(_) | ClientError::InvalidUrl(_) => false,
        }
    }
}

/// How a tracker talks to the progress store.
#[async_trait::async_trait]
pub trait ProgressTransport: Send + Sync + 'static {
    /// `Ok(None)` when the server has nothing for this pair.
    async fn fetch(&self, user_id: &str, video_id: &str) -> Result<Option<ProgressRecord>, ClientError>;

    async fn push(
        &self,
        user_id: &str,
        video_id: &str,
        request: &SyncRequest,
    ) -> Result<ProgressRecord, ClientError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProgressResponse {
    #[serde(flatten)]
    record: ProgressRecord,
    storage_type: Option<StorageKind>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ProgressClient {
    base_url: Url,
    client: reqwest::Client,
}

impl ProgressClient {
    /// Create a client for the API mounted at `base_url` (e.g. "http://localhost:5000/api").
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder().build()?;
        let trimmed = base_url.trim_end_matches('/');
        let base_url =
            Url::parse(trimmed).map_err(|e| ClientError::InvalidUrl(format!("{}: {}", trimmed, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(trimmed.to_string()));
        }
        tracing::debug!(base_url = %base_url, "creating ProgressClient");
        Ok(ProgressClient { base_url, client })
    }

    fn url(&self, user_id: &str, video_id: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["progress", user_id, video_id]);
        }
        url
    }

    async fn error_from(resp: reqwest::Response) -> ClientError {
        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return ClientError::RateLimited;
        }
        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
        ClientError::Status {
            status: status.as_u16(),
            message,
        }
    }

    fn decode(body: &str) -> Result<ProgressRecord, ClientError> {
        let parsed: ProgressResponse = serde_json::from_str(body)?;
        tracing::debug!(storage = ?parsed.storage_type, progress = parsed.record.progress, "decoded progress response");
        Ok(parsed.record)
    }

    /// GET /progress/:user_id/:video_id
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get_progress(
        &self,
        user_id: &str,
        video_id: &str,
    ) -> Result<Option<ProgressRecord>, ClientError> {
        let url = self.url(user_id, video_id);
        tracing::debug!(%url, "GET progress");
        let resp = self.client.get(url).send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            StatusCode::FORBIDDEN => {
                tracing::warn!(%user_id, %video_id, "permission denied reading progress, treating as no data");
                return Ok(None);
            }
            status if !status.is_success() => return Err(Self::error_from(resp).await),
            _ => {}
        }
        let body = resp.text().await?;
        if body.trim().is_empty() {
            tracing::warn!(%user_id, %video_id, "empty progress response, treating as no data");
            return Ok(None);
        }
        Self::decode(&body).map(Some)
    }

    /// POST /progress/:user_id/:video_id
    #[tracing::instrument(level = "debug", skip(self, request))]
    pub async fn update_progress(
        &self,
        user_id: &str,
        video_id: &str,
        request: &SyncRequest,
    ) -> Result<ProgressRecord, ClientError> {
        let url = self.url(user_id, video_id);
        tracing::debug!(%url, intervals = request.new_intervals.len(), forced = ?request.force_progress, "POST progress");
        let resp = self.client.post(url).json(request).send().await?;
        if !resp.status().is_success() {
            return Err(Self::error_from(resp).await);
        }
        let body = resp.text().await?;
        Self::decode(&body)
    }
}

#[async_trait::async_trait]
impl ProgressTransport for ProgressClient {
    async fn fetch(&self, user_id: &str, video_id: &str) -> Result<Option<ProgressRecord>, ClientError> {
        self.get_progress(user_id, video_id).await
    }

    async fn push(
        &self,
        user_id: &str,
        video_id: &str,
        request: &SyncRequest,
    ) -> Result<ProgressRecord, ClientError> {
        self.update_progress(user_id, video_id, request).await
    }
}
