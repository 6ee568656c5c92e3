//! API server configuration.

use std::str::FromStr;
use std::time::Duration;

use solfege_core::auth::jwt::resolve_jwt_secret;
use solfege_core::auth::rate_limit::{DEFAULT_LIMIT, DEFAULT_WINDOW};
use tracing::warn;

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:3100").
    pub bind_addr: String,
    /// PostgreSQL connection URL.
    pub pg_connection_url: String,
    /// JWT signing secret.
    pub jwt_secret: String,
    /// Public origin of the web app; reset links are built on it.
    pub app_base_url: String,
    /// Mark cookies `Secure`.
    pub secure_cookies: bool,
    /// Required `x-admin-invite` value for registering an admin. `None` disables it.
    pub admin_invite_secret: Option<String>,
    /// Record privacy consent submissions in the audit log.
    pub persist_consent: bool,
    /// Attempts allowed per client per window (login and reset requests).
    pub login_rate_limit: u32,
    pub login_rate_window: Duration,
}

impl ApiConfig {
    /// Defaults for everything but the signing secret. Reads no environment.
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            bind_addr: "127.0.0.1:3100".into(),
            pg_connection_url: "postgres://localhost:5432/solfege".into(),
            jwt_secret: jwt_secret.into(),
            app_base_url: "http://localhost:3000".into(),
            secure_cookies: false,
            admin_invite_secret: None,
            persist_consent: false,
            login_rate_limit: DEFAULT_LIMIT,
            login_rate_window: DEFAULT_WINDOW,
        }
    }

    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable               | Default                                |
    /// |------------------------|----------------------------------------|
    /// | `BIND_ADDR`            | `127.0.0.1:3100`                       |
    /// | `DATABASE_URL`         | `postgres://localhost:5432/solfege`    |
    /// | `JWT_SECRET` / `AUTH_SECRET` | generated & persisted to file    |
    /// | `APP_BASE_URL`         | `http://localhost:3000`                |
    /// | `SECURE_COOKIES`       | `false`                                |
    /// | `ADMIN_INVITE_SECRET`  | unset                                  |
    /// | `PERSIST_CONSENT`      | `false`                                |
    /// | `LOGIN_RATE_LIMIT`     | `5`                                    |
    /// | `LOGIN_RATE_WINDOW_MS` | `300000`                               |
    pub fn from_env() -> Self {
        let defaults = Self::new(resolve_jwt_secret());
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            pg_connection_url: std::env::var("DATABASE_URL").unwrap_or(defaults.pg_connection_url),
            app_base_url: std::env::var("APP_BASE_URL").unwrap_or(defaults.app_base_url),
            secure_cookies: env_flag("SECURE_COOKIES"),
            admin_invite_secret: std::env::var("ADMIN_INVITE_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            persist_consent: env_flag("PERSIST_CONSENT"),
            login_rate_limit: env_parse("LOGIN_RATE_LIMIT", defaults.login_rate_limit),
            login_rate_window: Duration::from_millis(env_parse(
                "LOGIN_RATE_WINDOW_MS",
                defaults.login_rate_window.as_millis() as u64,
            )),
            ..defaults
        }
    }
}

/// `1`, `true` or `yes` (any case) enable a flag.
fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn env_parse<T: FromStr + Copy + std::fmt::Display>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(name, value = %raw, %default, "unparseable value, using default");
            default
        }),
        Err(_) => default,
    }
}
