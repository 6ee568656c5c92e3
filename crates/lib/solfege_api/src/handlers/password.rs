//! Password reset handlers for the code and link flows.

use axum::Json;
use axum::extract::{Query, State};
use solfege_core::auth::reset::LinkStatus;
use solfege_core::notify::Locale;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::models::{
    CodeRequest, CodeResetRequest, CodeVerifyRequest, LinkRequest, LinkResetRequest,
    LinkValidateQuery, OkResponse, TokenResponse,
};

/// `POST /api/auth/password/request`: send a six-digit code.
pub async fn request_code_handler(
    State(state): State<AppState>,
    Json(body): Json<CodeRequest>,
) -> AppResult<Json<OkResponse>> {
    state
        .resets
        .request_code(&body.email_or_phone, Locale::parse(body.locale.as_deref()))
        .await?;
    Ok(Json(OkResponse::ok()))
}

/// `POST /api/auth/password/verify`: exchange a correct code for a reset token.
pub async fn verify_code_handler(
    State(state): State<AppState>,
    Json(body): Json<CodeVerifyRequest>,
) -> AppResult<Json<TokenResponse>> {
    let token = state
        .resets
        .verify_code(&body.email_or_phone, &body.code)
        .await?;
    Ok(Json(TokenResponse { token }))
}

/// `POST /api/auth/password/reset`: set a new password with a reset token.
pub async fn reset_code_handler(
    State(state): State<AppState>,
    Json(body): Json<CodeResetRequest>,
) -> AppResult<Json<OkResponse>> {
    state
        .resets
        .reset_with_code(&body.token, &body.new_password)
        .await?;
    Ok(Json(OkResponse::ok()))
}

/// `POST /api/auth/password/email/request`: mail a reset link.
pub async fn request_link_handler(
    State(state): State<AppState>,
    Json(body): Json<LinkRequest>,
) -> AppResult<Json<OkResponse>> {
    state
        .resets
        .request_link(&body.email, Locale::parse(body.locale.as_deref()))
        .await?;
    Ok(Json(OkResponse::ok()))
}

/// `GET /api/auth/password/email/validate?token=`: check a link without using it.
pub async fn validate_link_handler(
    State(state): State<AppState>,
    Query(query): Query<LinkValidateQuery>,
) -> AppResult<Json<LinkStatus>> {
    if query.token.is_empty() {
        return Err(AppError::Validation("Token required".into()));
    }
    let status = state.resets.validate_link(&query.token).await?;
    Ok(Json(status))
}

/// `POST /api/auth/password/email/reset`: consume a link and set the password.
pub async fn reset_link_handler(
    State(state): State<AppState>,
    Json(body): Json<LinkResetRequest>,
) -> AppResult<Json<OkResponse>> {
    state
        .resets
        .reset_with_link(&body.token, &body.password, &body.confirm)
        .await?;
    Ok(Json(OkResponse::ok()))
}
