use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    Json,
};
use bytes::Bytes;
use tracing::{debug, info};

use super::RouteState;
use crate::{
    data_model::UploadRequest,
    http_objects::{FileVaultAPIError, UploadResponse},
};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

struct FilePart {
    file_name: String,
    content_type: String,
    bytes: Bytes,
}

fn multipart_error(e: MultipartError) -> FileVaultAPIError {
    FileVaultAPIError::new(e.status(), &e.body_text())
}

/// Upload a file together with its description
#[utoipa::path(
    post,
    path = "/image/upload",
    request_body(content_type = "multipart/form-data", content = inline(crate::http_objects::UploadForm)),
    tag = "files",
    responses(
        (status = 201, description = "file stored", body = UploadResponse),
        (status = 400, description = "malformed multipart body or missing parts"),
        (status = 413, description = "request body too large"),
        (status = INTERNAL_SERVER_ERROR, description = "upload failed and was rolled back")
    ),
)]
#[axum::debug_handler]
pub async fn upload_file(
    State(state): State<RouteState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), FileVaultAPIError> {
    let mut file: Option<FilePart> = None;
    let mut description: Option<String> = None;
    let mut tags: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match name.as_str() {
            "file" | "image" => {
                if file.is_some() {
                    return Err(FileVaultAPIError::bad_request(
                        "only one file part is allowed",
                    ));
                }
                let file_name = field
                    .file_name()
                    .filter(|file_name| !file_name.is_empty())
                    .map(str::to_string)
                    .ok_or_else(|| FileVaultAPIError::bad_request("file part has no file name"))?;
                let content_type = field
                    .content_type()
                    .unwrap_or(DEFAULT_CONTENT_TYPE)
                    .to_string();
                let bytes = field.bytes().await.map_err(multipart_error)?;
                file = Some(FilePart {
                    file_name,
                    content_type,
                    bytes,
                });
            }
            "description" => description = Some(field.text().await.map_err(multipart_error)?),
            "tags" => tags = Some(field.text().await.map_err(multipart_error)?),
            _ => debug!("ignoring multipart field {}", name),
        }
    }

    let file = file.ok_or_else(|| FileVaultAPIError::bad_request("file is required"))?;
    let description =
        description.ok_or_else(|| FileVaultAPIError::bad_request("description is required"))?;

    let file_name = file.file_name.clone();
    let mut request = UploadRequest::new(file.file_name, file.content_type, file.bytes)
        .with_description(description);
    if let Some(tags) = tags {
        request = request.with_tags(tags);
    }

    let result = state
        .workers
        .submit(request)
        .await
        .map_err(FileVaultAPIError::internal_error)?;

    match result.into_result() {
        Ok(id) => {
            info!("stored {} as {}", file_name, id);
            Ok((
                StatusCode::CREATED,
                Json(UploadResponse::new(&file_name, id)),
            ))
        }
        Err(err) => Err(FileVaultAPIError::internal_error_str(&format!(
            "failed to upload [{file_name}]: {err}"
        ))),
    }
}
