pub mod models;
pub mod rate_limit;
pub mod routes;
pub mod services;

use std::sync::Arc;

use poem::{
    EndpointExt, Route,
    endpoint::BoxEndpoint,
    middleware::{Cors, Tracing as PoemTracing},
};
use poem_openapi::OpenApiService;

use crate::storage::ProgressStore;
pub use rate_limit::RateLimit;
pub use routes::ProgressApi;

/// Mount point of the JSON API.
pub const API_PREFIX: &str = "/api";

/// Assembles the HTTP application: the progress API under `/api`, the
/// OpenAPI document under `/spec` and a RapiDoc UI under `/ui`.
pub fn build_app(
    store: Arc<dyn ProgressStore>,
    rate_limit_per_minute: u32,
    server_url: &str,
) -> BoxEndpoint<'static> {
    let version = env!("CARGO_PKG_VERSION");
    let api = ProgressApi { store };
    let api_service = OpenApiService::new(api, "Video Progress API", version)
        .server(format!("{}{}", server_url.trim_end_matches('/'), API_PREFIX));
    let ui = api_service.rapidoc();
    let spec = api_service.spec();
    Route::new()
        .nest(API_PREFIX, api_service)
        .nest("/ui", ui)
        .nest("/spec", poem::endpoint::make_sync(move |_| spec.clone()))
        .with(RateLimit::per_minute(rate_limit_per_minute))
        .with(Cors::new())
        .with(PoemTracing)
        .map_to_response()
        .boxed()
}
