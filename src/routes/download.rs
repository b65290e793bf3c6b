use anyhow::anyhow;
use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::Response,
};

use super::RouteState;
use crate::http_objects::FileVaultAPIError;

/// Download a stored file
#[utoipa::path(
    get,
    path = "/image/download/{id}",
    tag = "files",
    params(("id" = String, Path, description = "id returned by the upload")),
    responses(
        (status = 200, description = "file contents"),
        (status = 404, description = "unknown id"),
        (status = INTERNAL_SERVER_ERROR, description = "Internal Server Error")
    ),
)]
pub async fn download_file(
    Path(id): Path<String>,
    State(state): State<RouteState>,
) -> Result<Response<Body>, FileVaultAPIError> {
    let record = state.metadata_store.get(&id).await.map_err(|e| {
        FileVaultAPIError::internal_error(anyhow!("failed to read metadata for {}: {}", id, e))
    })?;

    let stream = state.blob_storage.get(&id).await.map_err(|e| {
        if e.is_not_found() {
            FileVaultAPIError::not_found(&format!("file {id} not found"))
        } else {
            FileVaultAPIError::internal_error(anyhow!("failed to read blob {}: {}", id, e))
        }
    })?;

    let mut response = Response::builder();
    match record {
        Some(record) => {
            response = response
                .header(header::CONTENT_TYPE, record.file_type)
                .header(header::CONTENT_LENGTH, record.size.to_string());
        }
        None => {
            response = response.header(header::CONTENT_TYPE, "application/octet-stream");
        }
    }
    response
        .body(Body::from_stream(stream))
        .map_err(|e| FileVaultAPIError::internal_error_str(&e.to_string()))
}
