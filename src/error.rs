//! Structured error taxonomy mapped onto HTTP status codes at the
//! route boundary. Internal fallible code uses `anyhow::Result`; this
//! type is the seam where that gets sanitized and turned into a
//! response body (spec §7).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json as AxumJson, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("bad request: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("payload too large: {0}")]
    TooLarge(String),

    #[error("request blocked: {0}")]
    RateLimited(String),

    #[error("tamper detected")]
    Tamper,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("operation cancelled")]
    Cancelled,

    /// Catch-all for programming errors; logged with full context and
    /// sanitized before leaving the process.
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn status_and_body(&self) -> (StatusCode, String) {
        match self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Auth(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::MethodNotAllowed(msg) => (StatusCode::METHOD_NOT_ALLOWED, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::TooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg.clone()),
            AppError::RateLimited(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::Tamper => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "integrity verification failed".to_string(),
            ),
            AppError::Transport(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::Cancelled => (StatusCode::CONFLICT, "operation cancelled".to_string()),
            AppError::Internal(err) => {
                tracing::error!(error = ?err, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_body();
        let body = AxumJson(json!({
            "error": message,
            "statusCode": status.as_u16(),
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tamper_never_leaks_detail() {
        let err = AppError::Tamper;
        let (status, msg) = err.status_and_body();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(msg, "integrity verification failed");
    }

    #[test]
    fn internal_sanitizes_message() {
        let err = AppError::Internal(anyhow::anyhow!("leaked secret path /etc/shadow"));
        let (status, msg) = err.status_and_body();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(msg, "Internal Server Error");
    }

    #[test]
    fn conflict_maps_to_409() {
        let err = AppError::Conflict("replay".to_string());
        let (status, _) = err.status_and_body();
        assert_eq!(status, StatusCode::CONFLICT);
    }
}
