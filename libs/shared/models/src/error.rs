use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// HTTP-facing error carrying a stable machine-readable code and a human message.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not Found: {message}")]
    NotFound { code: String, message: String },

    #[error("Bad Request: {message}")]
    BadRequest { code: String, message: String },

    #[error("Validation error: {message}")]
    ValidationError { code: String, message: String },

    #[error("Conflict: {message}")]
    Conflict { code: String, message: String },

    #[error("Internal Server Error: {message}")]
    Internal { code: String, message: String },
}

impl AppError {
    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::NotFound { code: code.into(), message: message.into() }
    }

    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::BadRequest { code: code.into(), message: message.into() }
    }

    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::ValidationError { code: code.into(), message: message.into() }
    }

    pub fn conflict(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Conflict { code: code.into(), message: message.into() }
    }

    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Internal { code: code.into(), message: message.into() }
    }

    pub fn code(&self) -> &str {
        match self {
            AppError::NotFound { code, .. }
            | AppError::BadRequest { code, .. }
            | AppError::ValidationError { code, .. }
            | AppError::Conflict { code, .. }
            | AppError::Internal { code, .. } => code,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            AppError::ValidationError { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (code, message) = match self {
            AppError::NotFound { code, message }
            | AppError::BadRequest { code, message }
            | AppError::ValidationError { code, message }
            | AppError::Conflict { code, message }
            | AppError::Internal { code, message } => (code, message),
        };

        if status.is_server_error() {
            tracing::error!("Error: {}: {} ({})", status, message, code);
        } else {
            tracing::debug!("Request rejected: {}: {} ({})", status, message, code);
        }

        let body = Json(json!({
            "ok": false,
            "code": code,
            "message": message
        }));

        (status, body).into_response()
    }
}
