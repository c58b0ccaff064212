use poem_openapi::payload::Json;

use crate::{
    domain::SyncRequest,
    progress_api::models::{
        ErrorDto, GetProgressResponse, ProgressDto, SyncRequestDto, UpdateProgressResponse,
    },
    storage::{ProgressStore, StoreError},
};

pub struct ProgressService<'a> {
    pub store: &'a dyn ProgressStore,
}

impl<'a> ProgressService<'a> {
    pub fn new(store: &'a dyn ProgressStore) -> Self {
        Self { store }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get_progress(&self, user_id: &str, video_id: &str) -> GetProgressResponse {
        let kind = self.store.kind();
        match self.store.get(user_id, video_id).await {
            Ok(Some(record)) => GetProgressResponse::Ok(Json(ProgressDto::from_record(record, kind))),
            Ok(None) => GetProgressResponse::NotFound(Json(ErrorDto {
                message: "No progress found for this user and video".into(),
                storage_type: Some(kind.into()),
            })),
            Err(e) => {
                tracing::error!(error = %e, %user_id, %video_id, "failed to fetch progress");
                GetProgressResponse::InternalError(Json(ErrorDto {
                    message: format!("Server error: {}", e),
                    storage_type: Some(kind.into()),
                }))
            }
        }
    }

    #[tracing::instrument(level = "debug", skip(self, body))]
    pub async fn update_progress(
        &self,
        user_id: &str,
        video_id: &str,
        body: SyncRequestDto,
    ) -> UpdateProgressResponse {
        let request = SyncRequest::from(body);
        tracing::info!(
            %user_id,
            %video_id,
            new_intervals = request.new_intervals.len(),
            total_duration = request.total_duration,
            last_watched_time = ?request.last_watched_time,
            force_progress = ?request.force_progress,
            "updating progress"
        );

        if let Err(e) = request.validate() {
            return UpdateProgressResponse::BadRequest(Json(ErrorDto::from(format!(
                "Invalid request: {}",
                e
            ))));
        }

        let kind = self.store.kind();
        match self.store.merge_and_save(user_id, video_id, &request).await {
            Ok(record) => UpdateProgressResponse::Ok(Json(ProgressDto::from_record(record, kind))),
            Err(StoreError::Validation(e)) => UpdateProgressResponse::BadRequest(Json(
                ErrorDto::from(format!("Invalid request: {}", e)),
            )),
            Err(e) => {
                tracing::error!(error = %e, %user_id, %video_id, "failed to update progress");
                UpdateProgressResponse::InternalError(Json(ErrorDto {
                    message: format!("Server error: {}", e),
                    storage_type: Some(kind.into()),
                }))
            }
        }
    }
}
