//! The error envelope both surfaces share.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use tutu_types::{PoolError, RegistryError};

/// An error ready to leave the façade: status code plus message, rendered
/// as `{"error":{"message":…,"type":"error"}}`.
#[derive(Debug)]
pub struct ApiError {
    /// HTTP status to return.
    pub status: StatusCode,
    /// Human-readable message.
    pub message: String,
}

impl ApiError {
    /// 400 with a message.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    /// 404 with a message.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    /// 500 with a message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    /// Acquire failures surface as 400 `model error: …` on chat-shaped
    /// endpoints, whatever the underlying cause.
    pub fn model_error(err: &PoolError) -> Self {
        Self::bad_request(format!("model error: {err}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": { "message": self.message, "type": "error" }
        }));
        (self.status, body).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match &err {
            RegistryError::NotFound(_) | RegistryError::UnknownModel { .. } => {
                Self::not_found(err.to_string())
            }
            _ => Self::internal(err.to_string()),
        }
    }
}

impl From<tutu_types::BackendError> for ApiError {
    fn from(err: tutu_types::BackendError) -> Self {
        Self::internal(err.to_string())
    }
}
