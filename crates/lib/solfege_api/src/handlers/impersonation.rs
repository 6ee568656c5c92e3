//! Impersonation administration handlers. All routes are admin only.

use axum::Json;
use axum::extract::{Extension, Query, State};
use solfege_core::models::auth::SessionFilter;

use crate::AppState;
use crate::error::AppResult;
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{
    ImpersonateRequest, ImpersonateResponse, OkResponse, RevokeAllRequest, RevokeAllResponse,
    RevokeRequest, SessionsQuery, SessionsResponse,
};
use crate::services::impersonation;

fn filter(admin_id: Option<String>, user_id: Option<String>) -> SessionFilter {
    let non_empty = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    SessionFilter {
        admin_id: non_empty(admin_id),
        user_id: non_empty(user_id),
    }
}

/// `POST /api/auth/impersonate`: mint a revocable token for another user.
pub async fn impersonate_handler(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthenticatedUser>,
    Json(body): Json<ImpersonateRequest>,
) -> AppResult<Json<ImpersonateResponse>> {
    let resp = impersonation::mint(&state, &admin, &body.user_id).await?;
    Ok(Json(resp))
}

/// `GET /api/auth/impersonate/sessions?adminId=&userId=`: newest first.
pub async fn list_sessions_handler(
    State(state): State<AppState>,
    Query(query): Query<SessionsQuery>,
) -> Json<SessionsResponse> {
    let sessions = state
        .sessions
        .list(&filter(query.admin_id, query.user_id))
        .await;
    Json(SessionsResponse { sessions })
}

/// `POST /api/auth/impersonate/revoke`: revoke one session by `jti`.
pub async fn revoke_handler(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthenticatedUser>,
    Json(body): Json<RevokeRequest>,
) -> AppResult<Json<OkResponse>> {
    let ok = impersonation::revoke(&state, &admin, &body.jti).await?;
    Ok(Json(OkResponse { ok }))
}

/// `POST /api/auth/impersonate/revoke-all`: revoke by `adminId` and/or `userId`.
pub async fn revoke_all_handler(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthenticatedUser>,
    Json(body): Json<RevokeAllRequest>,
) -> AppResult<Json<RevokeAllResponse>> {
    let revoked =
        impersonation::revoke_all(&state, &admin, filter(body.admin_id, body.user_id)).await?;
    Ok(Json(RevokeAllResponse { ok: true, revoked }))
}
