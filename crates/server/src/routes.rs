use askama::Template;
use axum::{
    extract::State,
    http::Uri,
    response::{Html, Json},
    routing::{delete, get, post},
    Router,
};
use serde_json::{json, Value};
use snapvault_core::{GalleryConfig, UploadConfig};
use snapvault_storage::StorageBackend;
use std::sync::Arc;
use tracing::debug;

use crate::{
    delete::delete_photo,
    error::{ServerError, ServerResult},
    files::serve_photo,
    gallery::{format_size, gallery},
    upload::upload_photo,
};

/// Shared handler state. The backend is chosen once at startup and every
/// handler talks to it through the trait.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn StorageBackend>,
    pub upload: Arc<UploadConfig>,
    pub gallery: Arc<GalleryConfig>,
    pub enable_delete: bool,
}

impl AppState {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        upload: UploadConfig,
        gallery: GalleryConfig,
        enable_delete: bool,
    ) -> Self {
        Self {
            storage,
            upload: Arc::new(upload),
            gallery: Arc::new(gallery),
            enable_delete,
        }
    }
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate<'a> {
    title: &'a str,
    storage_kind: &'a str,
    field_name: &'a str,
    max_file_size: String,
    enable_delete: bool,
}

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/", get(index))
        .route("/upload", post(upload_photo))
        .route("/gallery", get(gallery))
        .route("/uploads/:filename", get(serve_photo))
        .route("/api/health", get(health_check))
        .route("/api/readyz", get(readiness_check));

    if state.enable_delete {
        router = router.route("/delete/:filename", delete(delete_photo));
    }

    router.fallback(not_found).with_state(state)
}

/// Landing page pointing at the gallery and upload endpoint
async fn index(State(state): State<AppState>) -> ServerResult<Html<String>> {
    let template = IndexTemplate {
        title: &state.gallery.title,
        storage_kind: state.storage.kind(),
        field_name: &state.upload.field_name,
        max_file_size: format_size(state.upload.max_file_size),
        enable_delete: state.enable_delete,
    };

    template
        .render()
        .map(Html)
        .map_err(|e| ServerError::Internal(format!("Template error: {}", e)))
}

/// Health check endpoint (liveness probe)
async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now(),
        "service": "snapvault",
        "storage": state.storage.kind(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Readiness check endpoint, succeeds once the backend can be listed
async fn readiness_check(State(state): State<AppState>) -> ServerResult<Json<Value>> {
    let images = state
        .storage
        .list()
        .await
        .map_err(|e| ServerError::storage("Storage not ready", e))?;

    Ok(Json(json!({
        "status": "ready",
        "timestamp": chrono::Utc::now(),
        "storage": state.storage.kind(),
        "images": images.len()
    })))
}

async fn not_found(uri: Uri) -> ServerError {
    debug!("No route for {}", uri);
    ServerError::NotFound("Route not found".to_string())
}
