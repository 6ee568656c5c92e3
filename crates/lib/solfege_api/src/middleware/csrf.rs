//! Same-origin and double-submit CSRF guards.

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    http::header::{HOST, ORIGIN},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use solfege_core::auth::AuthError;
use solfege_core::auth::csrf::{CSRF_COOKIE, CSRF_HEADER, verify_origin};
use tracing::warn;

use crate::AppState;
use crate::error::AppError;

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Axum middleware: `Origin` must match `Host`.
pub async fn require_same_origin(request: Request, next: Next) -> Result<Response, AppError> {
    let headers = request.headers();
    if !verify_origin(header(headers, ORIGIN.as_str()), header(headers, HOST.as_str())) {
        warn!(path = %request.uri().path(), "origin rejected");
        return Err(AuthError::OriginRejected.into());
    }
    Ok(next.run(request).await)
}

/// Axum middleware: same-origin check plus `x-csrf-token` header equal to the
/// `csrfToken` cookie.
pub async fn require_csrf(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let headers = request.headers();
    let jar = CookieJar::from_headers(headers);
    let result = state.csrf.check(
        header(headers, ORIGIN.as_str()),
        header(headers, HOST.as_str()),
        jar.get(CSRF_COOKIE).map(|c| c.value()),
        header(headers, CSRF_HEADER),
    );
    if let Err(e) = result {
        warn!(path = %request.uri().path(), reason = %e, "state-changing request refused");
        return Err(e.into());
    }
    Ok(next.run(request).await)
}
