use axum::{
    extract::{
        multipart::{Field, MultipartError, MultipartRejection},
        Multipart, State,
    },
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    error::{ServerError, ServerResult},
    routes::AppState,
};

/// Acknowledgement returned for a stored photo.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResult {
    pub success: bool,
    pub message: String,
    pub filename: String,
    pub size: u64,
    pub url: String,
}

/// A photo pulled out of the multipart body, not yet stored.
struct ReceivedFile {
    original_name: String,
    data: Vec<u8>,
}

/// `POST /upload`
///
/// Checks run in a fixed order: a file must be present, its extension must
/// be allowed, then its size must fit. Nothing is written unless all pass.
pub async fn upload_photo(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ServerResult<Json<UploadResult>> {
    let mut multipart = multipart.map_err(|rejection| {
        debug!("Upload rejected before reading body: {}", rejection);
        ServerError::BadRequest("No file received".to_string())
    })?;

    let received = read_photo_field(&state, &mut multipart).await?;

    let stored = state
        .storage
        .put(&received.original_name, &received.data)
        .await
        .map_err(|e| ServerError::storage("Upload failed", e))?;

    info!(
        "Stored upload {} as {} ({} bytes)",
        received.original_name, stored.name, stored.size_bytes
    );

    Ok(Json(UploadResult {
        success: true,
        message: "Upload successful".to_string(),
        url: state.storage.url_for(&stored.name),
        filename: stored.name,
        size: stored.size_bytes,
    }))
}

async fn read_photo_field(
    state: &AppState,
    multipart: &mut Multipart,
) -> ServerResult<ReceivedFile> {
    let upload = &state.upload;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(upload.field_name.as_str()) {
            continue;
        }

        // A plain text part under the photo field name is not a file, and
        // browsers send an empty filename when nothing was chosen.
        let original_name = match field.file_name() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => break,
        };

        if !upload.is_extension_allowed(&original_name) {
            warn!("Rejected upload with unsupported type: {}", original_name);
            return Err(ServerError::BadRequest(format!(
                "Unsupported file type. Allowed: {}",
                upload.allowed_extensions.join(", ")
            )));
        }

        let data = read_limited(field, upload.max_file_size).await?;
        if data.is_empty() {
            break;
        }

        return Ok(ReceivedFile {
            original_name,
            data,
        });
    }

    Err(ServerError::BadRequest("No file received".to_string()))
}

/// Buffer a field, giving up as soon as it grows past `max_size`.
async fn read_limited(mut field: Field<'_>, max_size: u64) -> ServerResult<Vec<u8>> {
    let mut data = Vec::new();

    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        let total = (data.len() + chunk.len()) as u64;
        if total > max_size {
            warn!("Rejected upload larger than {} bytes", max_size);
            return Err(ServerError::PayloadTooLarge(format!(
                "File too large. Maximum size is {} bytes",
                max_size
            )));
        }
        data.extend_from_slice(&chunk);
    }

    Ok(data)
}

fn multipart_error(err: MultipartError) -> ServerError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServerError::PayloadTooLarge("Request body too large".to_string())
    } else {
        ServerError::BadRequest(format!("Invalid multipart data: {}", err.body_text()))
    }
}
