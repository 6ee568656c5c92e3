//! Impersonation service: mint, revoke and bulk-revoke admin sessions.

use chrono::{Duration, Utc};
use serde_json::json;
use solfege_core::audit::{AuditEntry, record_quietly};
use solfege_core::auth::jwt::IMPERSONATION_TTL_SECS;
use solfege_core::models::auth::{ExtraClaims, SessionFilter};
use solfege_core::uuid::uuidv7;
use tracing::info;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthenticatedUser;
use crate::models::ImpersonateResponse;

/// Issue an impersonation token for `target_user_id` and register its session.
pub async fn mint(
    state: &AppState,
    admin: &AuthenticatedUser,
    target_user_id: &str,
) -> AppResult<ImpersonateResponse> {
    if admin.is_impersonating() {
        return Err(AppError::Forbidden(
            "Cannot impersonate from an impersonated session".into(),
        ));
    }
    let target_user_id = target_user_id.trim();
    if target_user_id.is_empty() {
        return Err(AppError::Validation("userId required".into()));
    }
    if target_user_id == admin.user_id() {
        return Err(AppError::Validation("Cannot impersonate yourself".into()));
    }
    let target = state
        .users
        .find_by_id(target_user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    let jti = uuidv7().to_string();
    let now = Utc::now();
    let token = state.tokens.issue_at(
        &target.id,
        &target.role,
        ExtraClaims::impersonation(jti.clone()),
        IMPERSONATION_TTL_SECS,
        now.timestamp(),
    )?;
    state
        .sessions
        .register(
            admin.user_id(),
            &target.id,
            &target.role,
            &jti,
            IMPERSONATION_TTL_SECS,
        )
        .await;

    record_quietly(
        state.audit.as_ref(),
        AuditEntry::new("CREATE", "Impersonation", &target.id, Some(admin.user_id()))
            .with_metadata(json!({ "jti": jti, "targetRole": target.role })),
    )
    .await;
    info!(admin = %admin.user_id(), target = %target.id, %jti, "impersonation token issued");

    Ok(ImpersonateResponse {
        token,
        jti,
        expires_at: now + Duration::seconds(IMPERSONATION_TTL_SECS),
    })
}

/// Revoke one impersonation session. Returns whether it was known.
pub async fn revoke(state: &AppState, admin: &AuthenticatedUser, jti: &str) -> AppResult<bool> {
    let jti = jti.trim();
    if jti.is_empty() {
        return Err(AppError::Validation("jti required".into()));
    }
    let found = state.sessions.revoke(jti).await;
    record_quietly(
        state.audit.as_ref(),
        AuditEntry::new("REVOKE", "Impersonation", jti, Some(admin.user_id()))
            .with_metadata(json!({ "found": found })),
    )
    .await;
    info!(admin = %admin.user_id(), jti, found, "impersonation session revoked");
    Ok(found)
}

/// Revoke every session matching `filter`. Requires at least one filter field.
pub async fn revoke_all(
    state: &AppState,
    admin: &AuthenticatedUser,
    filter: SessionFilter,
) -> AppResult<u64> {
    let revoked = state.sessions.revoke_all(&filter).await?;
    record_quietly(
        state.audit.as_ref(),
        AuditEntry::new("REVOKE_ALL", "Impersonation", "*", Some(admin.user_id())).with_metadata(
            json!({
                "adminId": filter.admin_id,
                "userId": filter.user_id,
                "revoked": revoked,
            }),
        ),
    )
    .await;
    Ok(revoked)
}
