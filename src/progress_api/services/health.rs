use poem_openapi::payload::Json;

use crate::{
    progress_api::models::{ServiceInfoDto, ServiceInfoResponse},
    storage::ProgressStore,
};

pub struct HealthService<'a> {
    pub store: &'a dyn ProgressStore,
}

impl<'a> HealthService<'a> {
    pub fn new(store: &'a dyn ProgressStore) -> Self {
        Self { store }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn service_info(&self) -> ServiceInfoResponse {
        ServiceInfoResponse::Ok(Json(ServiceInfoDto {
            message: "Video progress tracker API".into(),
            storage_type: self.store.kind().into(),
        }))
    }
}
