use std::sync::Arc;

use poem_openapi::{OpenApi, param::Path, payload::Json};

use super::models::{GetProgressResponse, ServiceInfoResponse, SyncRequestDto, UpdateProgressResponse};
use super::services::{health::HealthService, progress::ProgressService};
use crate::storage::ProgressStore;

pub struct ProgressApi {
    pub store: Arc<dyn ProgressStore>,
}

#[OpenApi]
impl ProgressApi {
    /// Service description and active storage backend
    #[oai(path = "/", method = "get")]
    #[tracing::instrument(level = "debug", skip(self))]
    async fn service_info(&self) -> ServiceInfoResponse {
        HealthService::new(self.store.as_ref()).service_info().await
    }

    /// Get a user's progress for a specific video
    #[oai(path = "/progress/:user_id/:video_id", method = "get")]
    #[tracing::instrument(level = "debug", skip(self, user_id, video_id))]
    async fn get_progress(
        &self,
        user_id: Path<String>,
        video_id: Path<String>,
    ) -> GetProgressResponse {
        ProgressService::new(self.store.as_ref())
            .get_progress(&user_id.0, &video_id.0)
            .await
    }

    /// Merge newly watched intervals into a user's progress for a video
    #[oai(path = "/progress/:user_id/:video_id", method = "post")]
    #[tracing::instrument(level = "debug", skip(self, user_id, video_id, body))]
    async fn update_progress(
        &self,
        user_id: Path<String>,
        video_id: Path<String>,
        body: Json<SyncRequestDto>,
    ) -> UpdateProgressResponse {
        ProgressService::new(self.store.as_ref())
            .update_progress(&user_id.0, &video_id.0, body.0)
            .await
    }
}
