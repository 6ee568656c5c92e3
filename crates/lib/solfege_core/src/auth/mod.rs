//! Authentication and session authority.
//!
//! Stateless token issuance and verification, the stateful impersonation
//! registry layered on top of it, anti-forgery and throttling guards, and the
//! two password reset flows. Shared by `solfege_api` handlers and middleware.

pub mod authenticator;
pub mod csrf;
pub mod jwt;
pub mod password;
pub mod postgres;
pub mod queries;
pub mod rate_limit;
pub mod reset;
pub mod sessions;
pub mod users;

use thiserror::Error;

/// Authentication errors.
///
/// Everything above `Conflict` is an expected outcome that callers surface
/// directly; the remaining variants are internal failures.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Session revoked")]
    Revoked,

    #[error("CSRF token rejected")]
    CsrfRejected,

    #[error("Origin rejected")]
    OriginRejected,

    #[error("Too many attempts")]
    RateLimited,

    #[error("Record not found")]
    RecordNotFound,

    #[error("Record expired")]
    RecordExpired,

    #[error("Attempts exhausted")]
    AttemptsExhausted,

    #[error("Record already used")]
    AlreadyUsed,

    #[error("Validation error: {0}")]
    ValidationFailed(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// True for failures that are not an expected auth outcome.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            AuthError::Db(_) | AuthError::StoreUnavailable(_) | AuthError::Internal(_)
        )
    }
}
