use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::Value;
use snapvault_core::{CoreConfig, GalleryConfig, ServerConfig, StoredImage, UploadConfig};
use snapvault_server::{create_app_router, AppState, Server};
use snapvault_storage::{StorageBackend, StorageError, StorageResult};
use std::sync::Arc;
use tempfile::{tempdir, TempDir};
use tower::ServiceExt;

const BOUNDARY: &str = "----snapvault-test-boundary";

/// Helper function to create a test server backed by a temporary directory
async fn create_test_app(customize: impl FnOnce(&mut CoreConfig)) -> (TempDir, Router) {
    let temp_dir = tempdir().unwrap();
    let mut config = CoreConfig::default();
    config.storage.local.path = temp_dir.path().join("uploads");
    customize(&mut config);

    let server = Server::new(config)
        .await
        .expect("Failed to create test server");
    (temp_dir, server.router())
}

fn multipart_body(field: &str, filename: Option<&str>, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    match filename {
        Some(filename) => {
            body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                    field, filename
                )
                .as_bytes(),
            );
            body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        }
        None => {
            body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", field).as_bytes(),
            );
        }
    }
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload_request(field: &str, filename: Option<&str>, content: &[u8]) -> Request<Body> {
    let body = multipart_body(field, filename, content);
    Request::builder()
        .method(Method::POST)
        .uri("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

async fn get(app: &Router, uri: &str) -> Response {
    send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

async fn delete(app: &Router, uri: &str) -> Response {
    send(
        app,
        Request::builder()
            .method(Method::DELETE)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
}

async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn gallery_html(app: &Router) -> String {
    let response = get(app, "/gallery").await;
    assert_eq!(response.status(), StatusCode::OK);
    body_text(response).await
}

fn stored_files(temp_dir: &TempDir) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(temp_dir.path().join("uploads"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn is_generated_name(name: &str, ext: &str) -> bool {
    name.strip_prefix("photo_")
        .and_then(|rest| rest.strip_suffix(&format!(".{}", ext)))
        .is_some_and(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
}

#[tokio::test]
async fn test_upload_then_gallery_shows_thumbnail() {
    let (_temp_dir, app) = create_test_app(|_| {}).await;

    let response = send(&app, upload_request("photo", Some("test.jpg"), &[0xAB; 1200])).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["message"], "Upload successful");
    assert_eq!(json["size"], 1200);
    let filename = json["filename"].as_str().unwrap().to_string();
    assert!(is_generated_name(&filename, "jpg"), "unexpected name {}", filename);
    assert_eq!(json["url"], format!("/uploads/{}", filename));

    let html = gallery_html(&app).await;
    assert_eq!(html.matches("<img ").count(), 1);
    assert!(html.contains(&format!(r#"src="/uploads/{}""#, filename)));
    assert!(html.contains(r#"width="300""#));
    assert!(html.contains("Total images: <span id=\"total\">1</span>"));
}

#[tokio::test]
async fn test_uploaded_photo_is_served_back() {
    let (_temp_dir, app) = create_test_app(|_| {}).await;

    let response = send(&app, upload_request("photo", Some("cam.jpg"), b"jpeg data")).await;
    let json = body_json(response).await;
    let url = json["url"].as_str().unwrap().to_string();

    let response = get(&app, &url).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/jpeg"
    );
    assert_eq!(body_text(response).await, "jpeg data");
}

#[tokio::test]
async fn test_upload_without_file_field() {
    let (temp_dir, app) = create_test_app(|_| {}).await;

    let response = send(&app, upload_request("note", Some("test.jpg"), b"data")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["message"], "No file received");

    // A text part under the right name is not a file either
    let response = send(&app, upload_request("photo", None, b"data")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert!(stored_files(&temp_dir).is_empty());
}

#[tokio::test]
async fn test_upload_empty_file_is_rejected() {
    let (temp_dir, app) = create_test_app(|_| {}).await;

    let response = send(&app, upload_request("photo", Some("empty.jpg"), b"")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(stored_files(&temp_dir).is_empty());
}

#[tokio::test]
async fn test_upload_form_without_chosen_file() {
    let (temp_dir, app) = create_test_app(|_| {}).await;

    // What a browser form posts when the file input is left empty
    let response = send(&app, upload_request("photo", Some(""), b"")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["message"], "No file received");
    assert!(stored_files(&temp_dir).is_empty());
}

#[tokio::test]
async fn test_upload_non_multipart_body() {
    let (_temp_dir, app) = create_test_app(|_| {}).await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/upload")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["message"], "No file received");
}

#[tokio::test]
async fn test_upload_unsupported_type() {
    let (temp_dir, app) = create_test_app(|_| {}).await;

    let response = send(&app, upload_request("photo", Some("notes.txt"), b"hello")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["message"]
        .as_str()
        .unwrap()
        .starts_with("Unsupported file type"));

    assert!(stored_files(&temp_dir).is_empty());
}

#[tokio::test]
async fn test_upload_extension_is_case_insensitive() {
    let (temp_dir, app) = create_test_app(|_| {}).await;

    let response = send(&app, upload_request("photo", Some("SHOT.PNG"), b"png")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert!(is_generated_name(json["filename"].as_str().unwrap(), "png"));
    assert_eq!(stored_files(&temp_dir).len(), 1);
}

#[tokio::test]
async fn test_upload_type_checked_before_size() {
    let (_temp_dir, app) = create_test_app(|config| {
        config.upload.max_file_size = 16;
    })
    .await;

    let response = send(&app, upload_request("photo", Some("big.exe"), &[0; 64])).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_too_large() {
    let (temp_dir, app) = create_test_app(|config| {
        config.upload.max_file_size = 1024;
    })
    .await;

    let response = send(&app, upload_request("photo", Some("big.jpg"), &[0; 2048])).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body_json(response).await["success"], false);

    // Exactly at the limit is fine
    let response = send(&app, upload_request("photo", Some("ok.jpg"), &[0; 1024])).await;
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(stored_files(&temp_dir).len(), 1);
}

#[tokio::test]
async fn test_request_body_over_server_limit() {
    let (temp_dir, app) = create_test_app(|config| {
        config.server.max_request_size = 512;
    })
    .await;

    let response = send(&app, upload_request("photo", Some("big.jpg"), &[0; 4096])).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(stored_files(&temp_dir).is_empty());
}

#[tokio::test]
async fn test_permissive_allow_list() {
    let (temp_dir, app) = create_test_app(|config| {
        config.upload.allowed_extensions.clear();
    })
    .await;

    let response = send(&app, upload_request("photo", Some("frame.raw"), b"raw")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert!(is_generated_name(json["filename"].as_str().unwrap(), "jpg"));
    assert_eq!(stored_files(&temp_dir).len(), 1);
}

#[tokio::test]
async fn test_empty_gallery_placeholder() {
    let (_temp_dir, app) = create_test_app(|_| {}).await;

    let html = gallery_html(&app).await;
    assert!(html.contains("ESP32-CAM Photo Gallery"));
    assert!(html.contains("Total images: <span id=\"total\">0</span>"));
    assert!(html.contains("No photos yet. Upload some from your ESP32!"));
    assert!(!html.contains("<img "));
}

#[tokio::test]
async fn test_gallery_counts_and_orders_uploads() {
    let (temp_dir, app) = create_test_app(|_| {}).await;

    let mut names = Vec::new();
    for i in 0..3 {
        let response = send(
            &app,
            upload_request("photo", Some("shot.jpg"), format!("image {}", i).as_bytes()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        names.push(body_json(response).await["filename"].as_str().unwrap().to_string());
    }

    // Unrelated files never show up
    std::fs::write(temp_dir.path().join("uploads").join("notes.txt"), b"x").unwrap();

    let html = gallery_html(&app).await;
    assert_eq!(html.matches("<img ").count(), 3);
    assert!(html.contains("Total images: <span id=\"total\">3</span>"));
    assert!(!html.contains("notes.txt"));

    // Newest first
    let positions: Vec<usize> = names
        .iter()
        .map(|name| html.find(&format!("src=\"/uploads/{}\"", name)).unwrap())
        .collect();
    assert!(positions[2] < positions[1]);
    assert!(positions[1] < positions[0]);
}

#[tokio::test]
async fn test_gallery_delete_controls_follow_config() {
    let (_temp_dir, app) = create_test_app(|_| {}).await;
    send(&app, upload_request("photo", Some("a.jpg"), b"a")).await;
    assert!(gallery_html(&app).await.contains("deletePhoto"));

    let (_temp_dir, app) = create_test_app(|config| {
        config.server.enable_delete = false;
    })
    .await;
    send(&app, upload_request("photo", Some("a.jpg"), b"a")).await;
    assert!(!gallery_html(&app).await.contains("deletePhoto"));
}

#[tokio::test]
async fn test_delete_photo() {
    let (temp_dir, app) = create_test_app(|_| {}).await;

    let response = send(&app, upload_request("photo", Some("test.jpg"), b"bytes")).await;
    let filename = body_json(response).await["filename"]
        .as_str()
        .unwrap()
        .to_string();

    let response = delete(&app, &format!("/delete/{}", filename)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert!(json["message"].is_string());
    assert!(stored_files(&temp_dir).is_empty());

    let response = delete(&app, &format!("/delete/{}", filename)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["message"], "File not found");

    let html = gallery_html(&app).await;
    assert!(html.contains("Total images: <span id=\"total\">0</span>"));
}

#[tokio::test]
async fn test_delete_invalid_names_are_not_found() {
    let (temp_dir, app) = create_test_app(|_| {}).await;
    std::fs::write(temp_dir.path().join("uploads").join(".hidden.jpg"), b"x").unwrap();
    std::fs::write(temp_dir.path().join("secret.jpg"), b"x").unwrap();

    for uri in ["/delete/..%2Fsecret.jpg", "/delete/.hidden.jpg"] {
        let response = delete(&app, uri).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "File not found");
    }

    assert!(temp_dir.path().join("secret.jpg").exists());
    assert!(temp_dir.path().join("uploads").join(".hidden.jpg").exists());
}

#[tokio::test]
async fn test_delete_route_disabled() {
    let (temp_dir, app) = create_test_app(|config| {
        config.server.enable_delete = false;
    })
    .await;

    let response = send(&app, upload_request("photo", Some("test.jpg"), b"bytes")).await;
    let filename = body_json(response).await["filename"]
        .as_str()
        .unwrap()
        .to_string();

    let response = delete(&app, &format!("/delete/{}", filename)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(stored_files(&temp_dir).len(), 1);
}

#[tokio::test]
async fn test_concurrent_uploads_get_distinct_names() {
    let (temp_dir, app) = create_test_app(|_| {}).await;

    let mut handles = Vec::new();
    for i in 0..10 {
        let app = app.clone();
        handles.push(tokio::spawn(async move {
            let request = upload_request("photo", Some("burst.jpg"), format!("{}", i).as_bytes());
            let response = app.oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(stored_files(&temp_dir).len(), 10);
    let html = gallery_html(&app).await;
    assert!(html.contains("Total images: <span id=\"total\">10</span>"));
}

#[tokio::test]
async fn test_health_and_index() {
    let (_temp_dir, app) = create_test_app(|_| {}).await;

    let response = get(&app, "/api/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["storage"], "local");

    let response = get(&app, "/api/readyz").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["images"], 0);

    let response = get(&app, "/").await;
    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    assert!(html.contains("/gallery"));
    assert!(html.contains(r#"name="photo""#));
}

#[tokio::test]
async fn test_unknown_route() {
    let (_temp_dir, app) = create_test_app(|_| {}).await;

    let response = get(&app, "/nope").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["success"], false);
}

#[tokio::test]
async fn test_server_rejects_bad_address() {
    let temp_dir = tempdir().unwrap();
    let mut config = CoreConfig::default();
    config.storage.local.path = temp_dir.path().join("uploads");
    config.server.host = "not an address".to_string();

    assert!(Server::new(config).await.is_err());
}

/// Backend whose every call fails, standing in for an unreachable remote.
struct FailingStorage;

#[async_trait]
impl StorageBackend for FailingStorage {
    async fn put(&self, _name_hint: &str, _data: &[u8]) -> StorageResult<StoredImage> {
        Err(StorageError::Backend("connection refused".to_string()))
    }

    async fn list(&self) -> StorageResult<Vec<StoredImage>> {
        Err(StorageError::Backend("connection refused".to_string()))
    }

    async fn retrieve(&self, _name: &str) -> StorageResult<Vec<u8>> {
        Err(StorageError::Backend("connection refused".to_string()))
    }

    async fn exists(&self, _name: &str) -> StorageResult<bool> {
        Ok(true)
    }

    async fn delete(&self, _name: &str) -> StorageResult<()> {
        Err(StorageError::Backend("connection refused".to_string()))
    }

    fn url_for(&self, name: &str) -> String {
        format!("https://example.invalid/{}", name)
    }

    fn kind(&self) -> &'static str {
        "failing"
    }
}

/// Backend that panics on list, to exercise the catch-all.
struct PanickingStorage;

#[async_trait]
impl StorageBackend for PanickingStorage {
    async fn put(&self, _name_hint: &str, _data: &[u8]) -> StorageResult<StoredImage> {
        panic!("put exploded")
    }

    async fn list(&self) -> StorageResult<Vec<StoredImage>> {
        panic!("list exploded")
    }

    async fn retrieve(&self, _name: &str) -> StorageResult<Vec<u8>> {
        panic!("retrieve exploded")
    }

    async fn exists(&self, _name: &str) -> StorageResult<bool> {
        panic!("exists exploded")
    }

    async fn delete(&self, _name: &str) -> StorageResult<()> {
        panic!("delete exploded")
    }

    fn url_for(&self, name: &str) -> String {
        name.to_string()
    }

    fn kind(&self) -> &'static str {
        "panicking"
    }
}

fn app_with(storage: Arc<dyn StorageBackend>) -> Router {
    let state = AppState::new(
        storage,
        UploadConfig::default(),
        GalleryConfig::default(),
        true,
    );
    create_app_router(state, &ServerConfig::default())
}

#[tokio::test]
async fn test_backend_failures_surface_as_500() {
    let app = app_with(Arc::new(FailingStorage));

    let response = send(&app, upload_request("photo", Some("test.jpg"), b"data")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert!(json["error"]
        .as_str()
        .unwrap()
        .contains("connection refused"));

    let response = get(&app, "/gallery").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let text = body_text(response).await;
    assert!(text.starts_with("Error reading photos"));
    assert!(text.contains("connection refused"));

    let response = delete(&app, "/delete/photo_1.jpg").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["message"], "Failed to delete file");
    assert!(json["error"].is_string());

    let response = get(&app, "/api/readyz").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_panics_become_generic_500() {
    let app = app_with(Arc::new(PanickingStorage));

    let response = get(&app, "/gallery").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["message"], "Internal server error");

    // The service keeps answering afterwards
    let response = get(&app, "/api/health").await;
    assert_eq!(response.status(), StatusCode::OK);
}
