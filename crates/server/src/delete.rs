use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};
use snapvault_storage::{validate_name, StorageError};
use tracing::info;

use crate::{
    error::{ServerError, ServerResult},
    routes::AppState,
};

/// `DELETE /delete/:filename`
pub async fn delete_photo(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ServerResult<Json<Value>> {
    // Names the store could never hold are simply not there.
    if validate_name(&filename).is_err() {
        return Err(file_not_found());
    }

    let exists = state
        .storage
        .exists(&filename)
        .await
        .map_err(|e| ServerError::storage("Failed to delete file", e))?;
    if !exists {
        return Err(file_not_found());
    }

    match state.storage.delete(&filename).await {
        Ok(()) => {
            info!("Deleted photo {}", filename);
            Ok(Json(json!({
                "success": true,
                "message": "File deleted successfully",
            })))
        }
        // Lost a race with another delete.
        Err(StorageError::NotFound(_)) => Err(file_not_found()),
        Err(e) => Err(ServerError::storage("Failed to delete file", e)),
    }
}

fn file_not_found() -> ServerError {
    ServerError::NotFound("File not found".to_string())
}
