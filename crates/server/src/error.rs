use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use snapvault_storage::StorageError;
use thiserror::Error;
use tracing::error;

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A backend failure. `message` is what the client sees, the source is
    /// passed along verbatim in the `error` field.
    #[error("{message}: {source}")]
    Storage {
        message: String,
        #[source]
        source: StorageError,
    },

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn storage(message: impl Into<String>, source: StorageError) -> Self {
        Self::Storage {
            message: message.into(),
            source,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Storage { .. } | ServerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();

        let body = match self {
            ServerError::BadRequest(msg)
            | ServerError::PayloadTooLarge(msg)
            | ServerError::NotFound(msg) => json!({
                "success": false,
                "message": msg,
            }),
            ServerError::Storage { message, source } => {
                error!("{}: {}", message, source);
                json!({
                    "success": false,
                    "message": message,
                    "error": source.to_string(),
                })
            }
            ServerError::Internal(detail) => {
                error!("Internal server error: {}", detail);
                json!({
                    "success": false,
                    "message": "Internal server error",
                    "error": detail,
                })
            }
        };

        (status, Json(body)).into_response()
    }
}
