//! Authentication service: login and registration over the core user directory.

use solfege_core::auth::jwt::SESSION_TTL_SECS;
use solfege_core::auth::password::{
    ensure_password_complexity, hash_password, sanitize_name, validate_email, verify_password,
    verify_password_for_missing_account,
};
use solfege_core::models::auth::{ADMIN_ROLE, ExtraClaims, NewUser, USER_ROLE, User};
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::models::RegisterRequest;

/// Shortest accepted display name, after sanitising.
const MIN_NAME_LEN: usize = 3;

/// Authenticate with email + password and issue a session token.
pub async fn login(state: &AppState, email: &str, password: &str) -> AppResult<String> {
    let email = email.trim();
    if !validate_email(email) || password.is_empty() {
        return Err(AppError::Validation("Email and password required".into()));
    }

    // Same response for unknown email and wrong password.
    let Some(found) = state.users.find_by_email(email).await? else {
        verify_password_for_missing_account(password);
        info!("login failed");
        return Err(AppError::Unauthorized);
    };
    if !verify_password(password, &found.password_hash)? {
        info!(user_id = %found.user.id, "login failed");
        return Err(AppError::Unauthorized);
    }

    let token = state.tokens.issue(
        &found.user.id,
        &found.user.role,
        ExtraClaims::default(),
        SESSION_TTL_SECS,
    )?;
    info!(user_id = %found.user.id, role = %found.user.role, "login succeeded");
    Ok(token)
}

/// Create an account and issue its first session token.
///
/// Every account gets the `user` role unless `admin` is requested together
/// with an invite header matching `ADMIN_INVITE_SECRET`.
pub async fn register(
    state: &AppState,
    req: &RegisterRequest,
    invite: Option<&str>,
) -> AppResult<(User, String)> {
    let name = sanitize_name(&req.name);
    if name.chars().count() < MIN_NAME_LEN {
        return Err(AppError::Validation("Name too short".into()));
    }
    let email = req.email.trim();
    if !validate_email(email) {
        return Err(AppError::Validation("Invalid email".into()));
    }
    ensure_password_complexity(&req.password)?;
    if req.password != req.confirm_password {
        return Err(AppError::Validation("Passwords do not match".into()));
    }

    let wants_admin = req
        .role
        .as_deref()
        .is_some_and(|r| r.trim().eq_ignore_ascii_case(ADMIN_ROLE));
    let role = if wants_admin && invite_accepted(state, invite) {
        ADMIN_ROLE
    } else {
        if wants_admin {
            warn!(email, "admin registration without a valid invite; granting user role");
        }
        USER_ROLE
    };

    let user = state
        .users
        .create_user(NewUser {
            name,
            email: email.to_string(),
            password_hash: hash_password(&req.password)?,
            role: role.to_string(),
        })
        .await?;

    let token = state
        .tokens
        .issue(&user.id, &user.role, ExtraClaims::default(), SESSION_TTL_SECS)?;
    info!(user_id = %user.id, role = %user.role, "account registered");
    Ok((user, token))
}

fn invite_accepted(state: &AppState, invite: Option<&str>) -> bool {
    match (state.config.admin_invite_secret.as_deref(), invite) {
        (Some(secret), Some(given)) if !given.is_empty() => {
            secret.as_bytes().ct_eq(given.as_bytes()).into()
        }
        _ => false,
    }
}
