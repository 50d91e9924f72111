use axum::{
    extract::{Request, State},
    http::{header, HeaderName},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::any::Any;
use tracing::{error, info_span, warn, Span};
use uuid::Uuid;

use crate::error::ServerError;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request ID wrapper for extensions
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn get(&self) -> &str {
        &self.0
    }
}

/// Request ID middleware that adds correlation IDs to requests
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();

    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;

    if let Ok(header_value) = request_id.parse() {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), header_value);
    }

    response
}

/// Rejects requests whose declared Content-Length exceeds `max_size`
/// before any of the body is read.
pub async fn request_size_limit_middleware(
    State(max_size): State<usize>,
    request: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let declared = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());

    if let Some(length) = declared {
        if length > max_size {
            warn!(
                "Request rejected: body too large ({} bytes, max: {})",
                length, max_size
            );
            return Err(ServerError::PayloadTooLarge(format!(
                "Request body too large. Maximum size is {} bytes",
                max_size
            )));
        }
    }

    Ok(next.run(request).await)
}

/// Span for the trace layer, tagged with the id `request_id_middleware` assigned.
pub fn request_span(request: &Request) -> Span {
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(RequestId::get)
        .unwrap_or("-");

    info_span!(
        "request",
        method = %request.method(),
        uri = %request.uri(),
        request_id = %request_id,
    )
}

/// Last-resort handler: a panicking handler becomes a generic 500.
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "Unknown panic".to_string()
    };

    error!("Handler panicked: {}", detail);
    ServerError::Internal("Unexpected failure".to_string()).into_response()
}
