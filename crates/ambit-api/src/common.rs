// Shared response envelope and error mapping
//
// Every JSON endpoint answers `{success, data?}` or `{success:false, error}`.
// Errors never partially apply; validation failures reject the whole write.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use serde_json::json;

use ambit_core::error::CoreError;

/// Success envelope
pub fn ok<T: Serialize>(data: T) -> Response {
    Json(json!({ "success": true, "data": data })).into_response()
}

/// API error with the envelope shape
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(kind: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: format!("{kind} not found"),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "success": false, "error": self.message })),
        )
            .into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        tracing::error!(error = %e, "Internal error");
        ApiError::internal(e.to_string())
    }
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        match &e {
            CoreError::Validation(_) | CoreError::CircularDependency(_) => {
                ApiError::bad_request(e.to_string())
            }
            CoreError::NotFound(kind) => ApiError::not_found(kind),
            CoreError::Unauthorized(_) => ApiError::unauthorized(e.to_string()),
            _ => {
                tracing::error!(error = %e, "Internal error");
                ApiError::internal(e.to_string())
            }
        }
    }
}

pub type ApiResult = Result<Response, ApiError>;
