//! Per-client rate limiting.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use solfege_core::auth::AuthError;
use solfege_core::auth::rate_limit::client_key;
use tracing::warn;

use crate::AppState;
use crate::error::AppError;

async fn throttle(
    action: &str,
    state: &AppState,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key = client_key(action, request.headers());
    let decision = state.limiter.check(&key);
    if !decision.allowed {
        warn!(%key, "rate limit exceeded");
        return Err(AuthError::RateLimited.into());
    }
    Ok(next.run(request).await)
}

/// Axum middleware: throttles login attempts per client.
pub async fn throttle_login(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    throttle("login", &state, request, next).await
}

/// Axum middleware: throttles password reset requests per client.
pub async fn throttle_password_reset(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    throttle("password_reset", &state, request, next).await
}

/// Axum middleware: throttles reset code guesses per client.
pub async fn throttle_password_verify(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    throttle("password_verify", &state, request, next).await
}
