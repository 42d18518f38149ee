use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::AppError;
use serde::Serialize;
use thiserror::Error;

/// Operational-surface error, grounded on the ambient platform's existing
/// `ApiError` (internal/validation/not-found/unauthorized/too-large variants),
/// narrowed to the cases the enqueue/ops surface can actually produce.
#[derive(Error, Debug, Serialize, Clone)]
pub enum ApiError {
    #[error("internal server error")]
    InternalError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::EntityNotFound(msg) => Self::NotFound(msg),
            AppError::ValidationFailure(msg) => Self::ValidationError(msg),
            other => {
                tracing::error!(error = %other, "internal error surfaced to ops API");
                Self::InternalError("internal server error".to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::InternalError(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
            Self::ValidationError(message) => (StatusCode::BAD_REQUEST, message),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
        };

        (
            status,
            Json(ErrorResponse {
                error: message,
                status: "error".to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    error: String,
    status: String,
}
