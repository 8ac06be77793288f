use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// API error with a stable machine-readable kind.
///
/// Every variant maps onto one of the stable error kinds exposed on the wire:
/// invalid_input, not_found, unauthorized, model_unavailable, model_timeout,
/// parse_failure, storage_error, conflict, internal.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Model call timed out after {0}s")]
    ModelTimeout(u64),

    #[error("Parse failure: {0}")]
    ParseFailure(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),

    // Database errors - auto-convert from sqlx::Error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    // Generic wrapper for other errors - auto-convert from anyhow::Error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn storage_error(message: impl Into<String>) -> Self {
        Self::StorageError(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Stable kind string used in wire responses and failure reasons.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::NotFound(_) => "not_found",
            Self::Unauthorized(_) => "unauthorized",
            Self::ModelUnavailable(_) => "model_unavailable",
            Self::ModelTimeout(_) => "model_timeout",
            Self::ParseFailure(_) => "parse_failure",
            Self::StorageError(_) => "storage_error",
            Self::Conflict(_) => "conflict",
            Self::Internal(_) | Self::Database(_) | Self::Other(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) | Self::ParseFailure(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ModelTimeout(_) => StatusCode::REQUEST_TIMEOUT,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::ModelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::StorageError(_) | Self::Internal(_) | Self::Database(_) | Self::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub error: &'static str,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let kind = self.kind();

        if status.is_server_error() {
            tracing::error!("API error ({}): {}", kind, self);
        }

        let body = ApiErrorResponse { error: kind, message: self.to_string() };
        (status, Json(body)).into_response()
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::ParseFailure(format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::StorageError(err.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
