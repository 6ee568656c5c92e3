//! Application error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use solfege_core::auth::AuthError;
use thiserror::Error;
use tracing::error;

use crate::models::ErrorResponse;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Message shared by every credential and token failure.
const INVALID_MESSAGE: &str = "Invalid or unknown credentials";

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    /// Credential or token failure. Never says which.
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Expired")]
    Expired,

    #[error("Too many requests")]
    RateLimited,

    #[error("Attempts exhausted")]
    AttemptsExhausted,

    #[error("Internal server error")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            AppError::Validation(m) => (StatusCode::BAD_REQUEST, "validation_error", m.as_str()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "invalid", INVALID_MESSAGE),
            AppError::Forbidden(m) => (StatusCode::FORBIDDEN, "forbidden", m.as_str()),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m.as_str()),
            AppError::Conflict(m) => (StatusCode::CONFLICT, "conflict", m.as_str()),
            AppError::Expired => (StatusCode::GONE, "expired", "This request has expired"),
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Too many attempts, try again later",
            ),
            AppError::AttemptsExhausted => (
                StatusCode::TOO_MANY_REQUESTS,
                "attempts_exhausted",
                "Too many wrong codes, request a new one",
            ),
            AppError::Internal(detail) => {
                error!(%detail, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error",
                )
            }
        };
        let body = Json(ErrorResponse {
            error: error.to_string(),
            message: message.to_string(),
        });
        (status, body).into_response()
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidCredentials
            | AuthError::InvalidToken
            | AuthError::Revoked
            | AuthError::RecordNotFound
            | AuthError::AlreadyUsed => AppError::Unauthorized,
            AuthError::CsrfRejected => AppError::Forbidden("CSRF token rejected".into()),
            AuthError::OriginRejected => AppError::Forbidden("Origin rejected".into()),
            AuthError::RateLimited => AppError::RateLimited,
            AuthError::AttemptsExhausted => AppError::AttemptsExhausted,
            AuthError::RecordExpired => AppError::Expired,
            AuthError::ValidationFailed(msg) => AppError::Validation(msg),
            AuthError::Conflict(msg) => AppError::Conflict(msg),
            e @ (AuthError::Db(_) | AuthError::StoreUnavailable(_) | AuthError::Internal(_)) => {
                AppError::Internal(e.to_string())
            }
        }
    }
}
