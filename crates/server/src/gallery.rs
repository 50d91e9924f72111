use askama::Template;
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use snapvault_core::{is_image_name, GalleryConfig, StoredImage};
use snapvault_storage::StorageBackend;
use tracing::{debug, error};

use crate::{
    error::{ServerError, ServerResult},
    routes::AppState,
};

/// One photo as the gallery page shows it.
#[derive(Debug, Clone)]
pub struct PhotoCard {
    pub name: String,
    /// Already percent-encoded by the backend, safe inside an attribute.
    pub url: String,
    pub uploaded: String,
    pub size: String,
}

#[derive(Template)]
#[template(path = "gallery.html")]
struct GalleryTemplate<'a> {
    title: &'a str,
    total: usize,
    photos: Vec<PhotoCard>,
    thumbnail_width: u32,
    enable_delete: bool,
}

/// `GET /gallery`
///
/// Failures answer with plain text, the page has no JSON consumers.
pub async fn gallery(State(state): State<AppState>) -> Response {
    match render_gallery(&state).await {
        Ok(html) => Html(html).into_response(),
        Err(ServerError::Storage { message, source }) => {
            error!("{}: {}", message, source);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("{}: {}", message, source),
            )
                .into_response()
        }
        Err(e) => {
            error!("Gallery rendering failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Error rendering gallery").into_response()
        }
    }
}

pub async fn render_gallery(state: &AppState) -> ServerResult<String> {
    let images = state
        .storage
        .list()
        .await
        .map_err(|e| ServerError::storage("Error reading photos", e))?;

    let photos = build_cards(images, &state.gallery, state.storage.as_ref());
    debug!("Rendering gallery with {} photos", photos.len());

    let template = GalleryTemplate {
        title: &state.gallery.title,
        total: photos.len(),
        photos,
        thumbnail_width: state.gallery.thumbnail_width,
        enable_delete: state.enable_delete,
    };

    template
        .render()
        .map_err(|e| ServerError::Internal(format!("Template error: {}", e)))
}

/// Drop non-image entries, order them and turn them into cards.
pub fn build_cards(
    mut images: Vec<StoredImage>,
    config: &GalleryConfig,
    storage: &dyn StorageBackend,
) -> Vec<PhotoCard> {
    images.retain(|image| is_image_name(&image.name));

    if config.newest_first {
        // Names embed the upload time, so they break ties between equal stamps.
        images.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.name.cmp(&a.name))
        });
    }

    images
        .into_iter()
        .map(|image| PhotoCard {
            url: storage.url_for(&image.name),
            uploaded: image.created_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            size: format_size(image.size_bytes),
            name: image.name,
        })
        .collect()
}

pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    format!("{:.1} {}", value, UNITS[unit])
}
