//! Privacy consent submissions.

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::header::USER_AGENT;
use chrono::Utc;
use serde_json::{Value, json};
use solfege_core::audit::{AuditEntry, record_quietly};
use solfege_core::auth::rate_limit::client_ip;
use tracing::info;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::identify;
use crate::models::OkResponse;

const CONSENT_FLAGS: [&str; 4] = ["analytics", "marketing", "accepted", "declined"];

/// `POST /api/privacy/consent`: validate the consent choices and, when
/// `PERSIST_CONSENT` is set, record them.
pub async fn consent_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> AppResult<Json<OkResponse>> {
    let mut flags = serde_json::Map::new();
    for name in CONSENT_FLAGS {
        let value = body
            .get(name)
            .and_then(Value::as_bool)
            .ok_or_else(|| AppError::Validation(format!("'{name}' must be a boolean")))?;
        flags.insert(name.to_string(), Value::Bool(value));
    }
    let timestamp = body
        .get("timestamp")
        .and_then(Value::as_i64)
        .unwrap_or_else(|| Utc::now().timestamp_millis());

    info!(?flags, timestamp, "privacy consent received");

    if state.config.persist_consent {
        // Anonymous submissions are fine; a bad credential is not an error here.
        let user_id = identify(&state, &headers)
            .await
            .ok()
            .map(|u| u.claims.sub);
        let mut metadata = Value::Object(flags);
        metadata["necessary"] = json!(true);
        metadata["timestamp"] = json!(timestamp);
        metadata["ip"] = json!(client_ip(&headers));
        metadata["userAgent"] = json!(headers.get(USER_AGENT).and_then(|v| v.to_str().ok()));

        record_quietly(
            state.audit.as_ref(),
            AuditEntry::new(
                "CONSENT",
                "PrivacyConsent",
                user_id.as_deref().unwrap_or("anonymous"),
                user_id.as_deref(),
            )
            .with_metadata(metadata),
        )
        .await;
    }

    Ok(Json(OkResponse::ok()))
}
