use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, MatchedPath, Request},
    routing::{get, post},
    Json,
    Router,
};
use blob_store::BlobStorage;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::{
    http_objects::{FileVaultAPIError, UploadResponse},
    state_store::MetadataStore,
    upload::workers::UploadWorkers,
};

mod download;
mod upload;
use download::download_file;
use upload::upload_file;

#[derive(OpenApi)]
#[openapi(
        paths(
            upload::upload_file,
            download::download_file,
        ),
        components(
            schemas(
                FileVaultAPIError,
                UploadResponse,
            )
        ),
        tags(
            (name = "files", description = "FileVault upload API")
        )
    )]
struct ApiDoc;

#[derive(Clone)]
pub struct RouteState {
    pub workers: UploadWorkers,
    pub blob_storage: Arc<BlobStorage>,
    pub metadata_store: Arc<dyn MetadataStore>,
}

pub fn create_routes(route_state: RouteState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/docs/openapi.json", get(openapi))
        .route(
            "/image/upload",
            post(upload_file).with_state(route_state.clone()),
        )
        .route(
            "/image/download/{id}",
            get(download_file).with_state(route_state.clone()),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request| {
                    let method = req.method();
                    let uri = req.uri();

                    let matched_path = req
                        .extensions()
                        .get::<MatchedPath>()
                        .map(|matched_path| matched_path.as_str());

                    tracing::debug_span!("request", %method, %uri, matched_path)
                })
                .on_failure(()),
        )
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}

async fn index() -> &'static str {
    "FileVault Server"
}

async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
