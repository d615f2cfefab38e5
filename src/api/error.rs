//! API error type and its `{success: false, error}` rendering

use axum::{
    extract::multipart::MultipartError,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::session::SessionError;
use crate::transport::WorkflowError;
use crate::verification::QrDecodeError;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Error, Debug)]
pub enum ApiError {
    /// Missing or malformed request fields
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    /// Delivering a delivered batch and similar terminal-state violations
    #[error("{0}")]
    Conflict(String),

    #[error("QR code mismatch: scanned {scanned}, expected {expected}")]
    Verification { scanned: String, expected: String },

    #[error("{0}")]
    RateLimited(String),

    /// Storage failure; the message is a fixed, user-safe summary
    #[error("{message}")]
    Persistence { message: String, detail: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            // Clients treat "already delivered" as a bad request
            ApiError::Conflict(_) => StatusCode::BAD_REQUEST,
            ApiError::Verification { .. } => StatusCode::BAD_REQUEST,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Persistence { .. } | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        match &self {
            ApiError::Persistence { message, detail } => {
                tracing::error!(error = %detail, message = %message, "Request failed on storage");
            }
            ApiError::Internal(detail) => tracing::error!(error = %detail, "Request failed"),
            other => tracing::info!(status = status.as_u16(), error = %other, "Request rejected"),
        }

        let body = match &self {
            ApiError::Verification { scanned, expected } => json!({
                "success": false,
                "error": self.to_string(),
                "scanned": scanned,
                "expected": expected,
            }),
            ApiError::Internal(_) => json!({
                "success": false,
                "error": "Internal server error",
            }),
            _ => json!({
                "success": false,
                "error": self.to_string(),
            }),
        };

        (status, Json(body)).into_response()
    }
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::Validation(msg) => ApiError::Validation(msg),
            WorkflowError::NotFound(msg) => ApiError::NotFound(msg),
            WorkflowError::Conflict(msg) => ApiError::Conflict(msg),
            WorkflowError::Verification { scanned, expected } => {
                ApiError::Verification { scanned, expected }
            }
            WorkflowError::Persistence { context, source } => ApiError::Persistence {
                message: context.to_string(),
                detail: source.to_string(),
            },
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::MissingCredentials => ApiError::Validation(err.to_string()),
            SessionError::InvalidCredentials => ApiError::Unauthorized(err.to_string()),
            SessionError::RateLimited => ApiError::RateLimited(err.to_string()),
            SessionError::Hashing(detail) => ApiError::Internal(detail),
            SessionError::Store(source) => ApiError::Persistence {
                message: "Session lookup failed".to_string(),
                detail: source.to_string(),
            },
        }
    }
}

impl From<QrDecodeError> for ApiError {
    fn from(err: QrDecodeError) -> Self {
        ApiError::Validation(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(format!("Invalid request body: {}", rejection.body_text()))
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::Validation(format!("Invalid upload: {}", err.body_text()))
    }
}
