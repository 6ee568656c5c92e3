//! Session request handlers: CSRF issuance, login, registration, logout, me.

use axum::Json;
use axum::extract::{Extension, State};
use axum::http::{HeaderMap, StatusCode};
use axum_extra::extract::cookie::CookieJar;
use solfege_core::auth::jwt::SESSION_TTL_SECS;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{
    CsrfResponse, LoginRequest, MeResponse, OkResponse, RegisterRequest, RegisterResponse,
    TokenResponse,
};
use crate::services::auth;
use crate::services::cookies::{clear_session_cookie, csrf_cookie, session_cookie};

/// Header carrying the admin registration invite.
const ADMIN_INVITE_HEADER: &str = "x-admin-invite";

/// `GET /api/auth/csrf`: issue a fresh anti-forgery cookie.
pub async fn csrf_handler(
    State(state): State<AppState>,
    jar: CookieJar,
) -> (CookieJar, Json<CsrfResponse>) {
    let token = state.csrf.issue();
    let jar = jar.add(csrf_cookie(&token, state.config.secure_cookies));
    (jar, Json(CsrfResponse { csrf_token: token }))
}

/// `POST /api/auth/login`: authenticate with email + password.
pub async fn login_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<LoginRequest>,
) -> AppResult<(CookieJar, Json<TokenResponse>)> {
    let token = auth::login(&state, &body.email, &body.password).await?;
    let jar = jar.add(session_cookie(
        &token,
        SESSION_TTL_SECS,
        state.config.secure_cookies,
    ));
    Ok((jar, Json(TokenResponse { token })))
}

/// `POST /api/auth/register`: create an account and sign it in.
pub async fn register_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(body): Json<RegisterRequest>,
) -> AppResult<(StatusCode, CookieJar, Json<RegisterResponse>)> {
    let invite = headers
        .get(ADMIN_INVITE_HEADER)
        .and_then(|v| v.to_str().ok());
    let (user, token) = auth::register(&state, &body, invite).await?;
    let jar = jar.add(session_cookie(
        &token,
        SESSION_TTL_SECS,
        state.config.secure_cookies,
    ));
    Ok((
        StatusCode::CREATED,
        jar,
        Json(RegisterResponse {
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
            token,
        }),
    ))
}

/// `POST /api/auth/logout`: drop the session cookie.
pub async fn logout_handler(
    State(state): State<AppState>,
    jar: CookieJar,
) -> (CookieJar, Json<OkResponse>) {
    let jar = jar.add(clear_session_cookie(state.config.secure_cookies));
    (jar, Json(OkResponse::ok()))
}

/// `GET /api/auth/me`: the identity behind the presented credential.
pub async fn me_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> AppResult<Json<MeResponse>> {
    let account = state
        .users
        .find_by_id(user.user_id())
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;
    Ok(Json(MeResponse {
        id: account.id,
        name: account.name,
        role: user.claims.role.clone(),
        impersonating: user.is_impersonating(),
    }))
}
