//! Authentication middleware: session cookie or bearer token, JWT
//! verification and impersonation revocation.

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use solfege_core::auth::authenticator::{CredentialSource, select_credential};
use solfege_core::models::auth::TokenClaims;
use tracing::debug;

use crate::AppState;
use crate::error::AppError;
use crate::services::cookies::SESSION_COOKIE;

/// Verified identity stored in request extensions.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub claims: TokenClaims,
    pub source: CredentialSource,
}

impl AuthenticatedUser {
    pub fn user_id(&self) -> &str {
        &self.claims.sub
    }

    /// The presented token is an impersonation token.
    pub fn is_impersonating(&self) -> bool {
        self.claims.impersonation_jti().is_some()
    }
}

/// Resolve the caller from request headers, if any credential checks out.
pub async fn identify(state: &AppState, headers: &HeaderMap) -> Result<AuthenticatedUser, AppError> {
    let authorization = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    let jar = CookieJar::from_headers(headers);
    let cookie = jar.get(SESSION_COOKIE).map(|c| c.value());

    let (source, token) = select_credential(authorization, cookie)?;
    let claims = state.authenticator.authenticate(token).await?;
    Ok(AuthenticatedUser { claims, source })
}

/// Axum middleware: authenticates the caller and injects [`AuthenticatedUser`]
/// into request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user = identify(&state, request.headers()).await.inspect_err(|_| {
        debug!(path = %request.uri().path(), "request not authenticated");
    })?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Axum middleware: requires [`require_auth`] to have run and the caller to be an admin.
pub async fn require_admin(request: Request, next: Next) -> Result<Response, AppError> {
    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .ok_or(AppError::Unauthorized)?;
    if !user.claims.is_admin() {
        debug!(user = %user.claims.sub, role = %user.claims.role, "admin route refused");
        return Err(AppError::Forbidden("Admin role required".into()));
    }
    Ok(next.run(request).await)
}
