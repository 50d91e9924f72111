use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use snapvault_core::ImageKind;
use snapvault_storage::StorageError;
use tracing::debug;

use crate::{
    error::{ServerError, ServerResult},
    routes::AppState,
};

/// `GET /uploads/:filename`, streams a stored photo back from whichever
/// backend holds it.
pub async fn serve_photo(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ServerResult<Response> {
    let data = state
        .storage
        .retrieve(&filename)
        .await
        .map_err(|e| match e {
            StorageError::NotFound(_) => ServerError::NotFound("File not found".to_string()),
            StorageError::InvalidPath(msg) => ServerError::BadRequest(msg),
            other => ServerError::storage("Failed to read file", other),
        })?;

    debug!("Serving {} ({} bytes)", filename, data.len());

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(content_type_for(&filename))),
            (
                header::CACHE_CONTROL,
                HeaderValue::from_static("public, max-age=31536000, immutable"),
            ),
            (
                header::X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static("nosniff"),
            ),
        ],
        data,
    )
        .into_response())
}

pub fn content_type_for(filename: &str) -> &'static str {
    ImageKind::from_filename(filename)
        .map(|kind| kind.content_type())
        .unwrap_or("application/octet-stream")
}

#[cfg(test)]
#[path = "files_test.rs"]
mod files_test;
