//! # solfege_api
//!
//! HTTP API library for Solfege authentication: sessions, impersonation,
//! password reset and privacy consent.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use std::sync::Arc;

use axum::Router;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use solfege_core::audit::{AuditSink, PgAuditSink};
use solfege_core::auth::AuthError;
use solfege_core::auth::authenticator::Authenticator;
use solfege_core::auth::csrf::CsrfGuard;
use solfege_core::auth::jwt::TokenAuthority;
use solfege_core::auth::postgres::{PgResetStore, PgSessionStore, PgUserDirectory};
use solfege_core::auth::rate_limit::RateLimiter;
use solfege_core::auth::reset::{PasswordResetFlow, ResetStore};
use solfege_core::auth::sessions::{SessionRegistry, SessionStore};
use solfege_core::auth::users::UserDirectory;
use solfege_core::memory::{
    MemoryResetStore, MemorySessionStore, MemoryUserDirectory, RecordingAuditSink,
};
use solfege_core::notify::{LogNotifier, Notifier};
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use url::Url;

use crate::config::ApiConfig;
use crate::handlers::{auth, impersonation, password, privacy};
use crate::middleware::auth::{require_admin, require_auth};
use crate::middleware::csrf::{require_csrf, require_same_origin};
use crate::middleware::throttle::{
    throttle_login, throttle_password_reset, throttle_password_verify,
};

/// Route paths.
pub mod routes {
    pub const GET_AUTH_CSRF: &str = "/api/auth/csrf";
    pub const POST_AUTH_LOGIN: &str = "/api/auth/login";
    pub const POST_AUTH_REGISTER: &str = "/api/auth/register";
    pub const POST_AUTH_LOGOUT: &str = "/api/auth/logout";
    pub const GET_AUTH_ME: &str = "/api/auth/me";
    pub const POST_AUTH_IMPERSONATE: &str = "/api/auth/impersonate";
    pub const GET_AUTH_IMPERSONATE_SESSIONS: &str = "/api/auth/impersonate/sessions";
    pub const POST_AUTH_IMPERSONATE_REVOKE: &str = "/api/auth/impersonate/revoke";
    pub const POST_AUTH_IMPERSONATE_REVOKE_ALL: &str = "/api/auth/impersonate/revoke-all";
    pub const POST_PASSWORD_REQUEST: &str = "/api/auth/password/request";
    pub const POST_PASSWORD_VERIFY: &str = "/api/auth/password/verify";
    pub const POST_PASSWORD_RESET: &str = "/api/auth/password/reset";
    pub const POST_PASSWORD_EMAIL_REQUEST: &str = "/api/auth/password/email/request";
    pub const GET_PASSWORD_EMAIL_VALIDATE: &str = "/api/auth/password/email/validate";
    pub const POST_PASSWORD_EMAIL_RESET: &str = "/api/auth/password/email/reset";
    pub const POST_PRIVACY_CONSENT: &str = "/api/privacy/consent";
}

/// Storage and delivery implementations behind the auth core.
#[derive(Clone)]
pub struct Backends {
    pub users: Arc<dyn UserDirectory>,
    pub sessions: Arc<dyn SessionStore>,
    pub resets: Arc<dyn ResetStore>,
    pub audit: Arc<dyn AuditSink>,
    pub notifier: Arc<dyn Notifier>,
}

impl Backends {
    /// PostgreSQL stores; notifications are logged only.
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            users: Arc::new(PgUserDirectory::new(pool.clone())),
            sessions: Arc::new(PgSessionStore::new(pool.clone())),
            resets: Arc::new(PgResetStore::new(pool.clone())),
            audit: Arc::new(PgAuditSink::new(pool)),
            notifier: Arc::new(LogNotifier),
        }
    }

    /// Process-local stores; everything is lost on restart.
    pub fn in_memory() -> Self {
        Self {
            users: Arc::new(MemoryUserDirectory::new()),
            sessions: Arc::new(MemorySessionStore::new()),
            resets: Arc::new(MemoryResetStore::new()),
            audit: Arc::new(RecordingAuditSink::new()),
            notifier: Arc::new(LogNotifier),
        }
    }
}

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// API configuration.
    pub config: ApiConfig,
    pub tokens: Arc<TokenAuthority>,
    pub sessions: Arc<SessionRegistry>,
    pub authenticator: Arc<Authenticator>,
    pub resets: Arc<PasswordResetFlow>,
    pub users: Arc<dyn UserDirectory>,
    pub audit: Arc<dyn AuditSink>,
    /// Shared by login and reset requests; keys carry the action name.
    pub limiter: Arc<RateLimiter>,
    pub csrf: CsrfGuard,
}

impl AppState {
    pub fn new(config: ApiConfig, backends: Backends) -> Result<Self, AuthError> {
        let tokens = Arc::new(TokenAuthority::new(config.jwt_secret.as_bytes())?);
        let sessions = Arc::new(SessionRegistry::new(backends.sessions));
        let authenticator = Arc::new(Authenticator::new(tokens.clone(), sessions.clone()));
        let base_url = parse_base_url(&config.app_base_url)?;
        let resets = Arc::new(PasswordResetFlow::new(
            backends.users.clone(),
            backends.resets,
            tokens.clone(),
            backends.notifier,
            backends.audit.clone(),
            base_url,
        ));
        let limiter = Arc::new(RateLimiter::new(
            config.login_rate_limit,
            config.login_rate_window,
        ));
        Ok(Self {
            config,
            tokens,
            sessions,
            authenticator,
            resets,
            users: backends.users,
            audit: backends.audit,
            limiter,
            csrf: CsrfGuard,
        })
    }
}

/// Base URL with a trailing slash, so that `join` appends rather than replaces.
fn parse_base_url(raw: &str) -> Result<Url, AuthError> {
    let with_slash = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    Url::parse(&with_slash)
        .map_err(|e| AuthError::Internal(format!("invalid APP_BASE_URL '{raw}': {e}")))
}

/// Run embedded database migrations.
///
/// Delegates to `solfege_core::migrate::migrate()` which owns the migration files.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    solfege_core::migrate::migrate(pool).await
}

/// Builds the Axum router with all routes and shared state.
///
/// Guards run outermost first: throttling, then authentication and role,
/// then origin and CSRF checks.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let csrf = from_fn_with_state(state.clone(), require_csrf);
    let same_origin = from_fn_with_state(state.clone(), require_same_origin);
    let authenticated = from_fn_with_state(state.clone(), require_auth);

    // Public, unguarded.
    let open = Router::new().route(routes::GET_AUTH_CSRF, get(auth::csrf_handler));

    // Throttled, then origin + CSRF.
    let login = Router::new()
        .route(routes::POST_AUTH_LOGIN, post(auth::login_handler))
        .route_layer(csrf.clone())
        .route_layer(from_fn_with_state(state.clone(), throttle_login));

    let reset_requests = Router::new()
        .route(routes::POST_PASSWORD_REQUEST, post(password::request_code_handler))
        .route(
            routes::POST_PASSWORD_EMAIL_REQUEST,
            post(password::request_link_handler),
        )
        .route_layer(csrf.clone())
        .route_layer(from_fn_with_state(state.clone(), throttle_password_reset));

    let code_checks = Router::new()
        .route(routes::POST_PASSWORD_VERIFY, post(password::verify_code_handler))
        .route_layer(csrf.clone())
        .route_layer(from_fn_with_state(state.clone(), throttle_password_verify));

    // Origin + CSRF.
    let forms = Router::new()
        .route(routes::POST_AUTH_REGISTER, post(auth::register_handler))
        .route(routes::POST_PASSWORD_RESET, post(password::reset_code_handler))
        .route(
            routes::POST_PASSWORD_EMAIL_RESET,
            post(password::reset_link_handler),
        )
        .route(routes::POST_PRIVACY_CONSENT, post(privacy::consent_handler))
        .route_layer(csrf.clone());

    // Origin only.
    let origin_only = Router::new()
        .route(routes::POST_AUTH_LOGOUT, post(auth::logout_handler))
        .route(
            routes::GET_PASSWORD_EMAIL_VALIDATE,
            get(password::validate_link_handler),
        )
        .route_layer(same_origin);

    // Any authenticated session.
    let session = Router::new()
        .route(routes::GET_AUTH_ME, get(auth::me_handler))
        .route_layer(authenticated.clone());

    // Admin only; state-changing routes also need CSRF.
    let admin_reads = Router::new()
        .route(
            routes::GET_AUTH_IMPERSONATE_SESSIONS,
            get(impersonation::list_sessions_handler),
        )
        .route_layer(from_fn(require_admin))
        .route_layer(authenticated.clone());

    let admin_writes = Router::new()
        .route(
            routes::POST_AUTH_IMPERSONATE,
            post(impersonation::impersonate_handler),
        )
        .route(
            routes::POST_AUTH_IMPERSONATE_REVOKE,
            post(impersonation::revoke_handler),
        )
        .route(
            routes::POST_AUTH_IMPERSONATE_REVOKE_ALL,
            post(impersonation::revoke_all_handler),
        )
        .route_layer(csrf)
        .route_layer(from_fn(require_admin))
        .route_layer(authenticated);

    Router::new()
        .merge(open)
        .merge(login)
        .merge(reset_requests)
        .merge(code_checks)
        .merge(forms)
        .merge(origin_only)
        .merge(session)
        .merge(admin_reads)
        .merge(admin_writes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gets_trailing_slash() {
        let url = parse_base_url("https://escola.example/app").unwrap();
        assert_eq!(
            url.join("reset-password/abc").unwrap().as_str(),
            "https://escola.example/app/reset-password/abc"
        );
        assert!(parse_base_url("not a url").is_err());
    }

    #[test]
    fn state_requires_a_secret() {
        assert!(AppState::new(ApiConfig::new(""), Backends::in_memory()).is_err());
        assert!(AppState::new(ApiConfig::new("s3cret"), Backends::in_memory()).is_ok());
    }
}
