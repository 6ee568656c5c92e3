//! Shared harness: the real router over in-memory backends.

#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, HOST, ORIGIN, SET_COOKIE};
use axum::http::{HeaderMap, Request, StatusCode};
use serde_json::Value;
use solfege_api::config::ApiConfig;
use solfege_api::{AppState, Backends};
use solfege_core::auth::jwt::SESSION_TTL_SECS;
use solfege_core::auth::password::hash_password;
use solfege_core::auth::users::UserDirectory;
use solfege_core::memory::{
    MemoryResetStore, MemorySessionStore, MemoryUserDirectory, RecordingAuditSink,
    RecordingNotifier,
};
use solfege_core::models::auth::{ExtraClaims, NewUser, User};
use tower::ServiceExt;

pub const TEST_HOST: &str = "solfege.test";
pub const TEST_ORIGIN: &str = "http://solfege.test";
pub const CSRF: &str = "test-csrf-token";
pub const PASSWORD: &str = "Clave#2024";

pub struct Harness {
    pub app: Router,
    pub state: AppState,
    pub users: Arc<MemoryUserDirectory>,
    pub sessions: Arc<MemorySessionStore>,
    pub resets: Arc<MemoryResetStore>,
    pub audit: Arc<RecordingAuditSink>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn harness() -> Harness {
    harness_with(ApiConfig::new("integration-secret"))
}

pub fn harness_with(config: ApiConfig) -> Harness {
    let users = Arc::new(MemoryUserDirectory::new());
    let sessions = Arc::new(MemorySessionStore::new());
    let resets = Arc::new(MemoryResetStore::new());
    let audit = Arc::new(RecordingAuditSink::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let backends = Backends {
        users: users.clone(),
        sessions: sessions.clone(),
        resets: resets.clone(),
        audit: audit.clone(),
        notifier: notifier.clone(),
    };
    let state = AppState::new(config, backends).expect("state");
    Harness {
        app: solfege_api::router(state.clone()),
        state,
        users,
        sessions,
        resets,
        audit,
        notifier,
    }
}

impl Harness {
    pub async fn seed(&self, name: &str, email: &str, role: &str) -> User {
        self.users
            .create_user(NewUser {
                name: name.into(),
                email: email.into(),
                password_hash: hash_password(PASSWORD).unwrap(),
                role: role.into(),
            })
            .await
            .unwrap()
    }

    /// A plain session token, as login would issue.
    pub fn session_token(&self, user: &User) -> String {
        self.state
            .tokens
            .issue(&user.id, &user.role, ExtraClaims::default(), SESSION_TTL_SECS)
            .unwrap()
    }

    pub async fn send(&self, req: Request<Body>) -> Reply {
        let resp = self.app.clone().oneshot(req).await.expect("request");
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .expect("read body");
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
        Reply {
            status,
            headers,
            json,
        }
    }
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub json: Value,
}

impl Reply {
    pub fn set_cookies(&self) -> Vec<String> {
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok().map(str::to_string))
            .collect()
    }

    pub fn error_code(&self) -> &str {
        self.json["error"].as_str().unwrap_or_default()
    }
}

/// Request builder with same-origin headers preset.
pub struct Req {
    method: &'static str,
    uri: String,
    body: Option<Value>,
    csrf: bool,
    bearer: Option<String>,
    session_cookie: Option<String>,
    origin: Option<String>,
    extra: Vec<(&'static str, String)>,
}

impl Req {
    pub fn get(uri: impl Into<String>) -> Self {
        Self::new("GET", uri.into(), None)
    }

    /// POST with JSON body and a valid CSRF pair.
    pub fn post(uri: impl Into<String>, body: Value) -> Self {
        Self::new("POST", uri.into(), Some(body)).csrf()
    }

    fn new(method: &'static str, uri: String, body: Option<Value>) -> Self {
        Self {
            method,
            uri,
            body,
            csrf: false,
            bearer: None,
            session_cookie: None,
            origin: Some(TEST_ORIGIN.into()),
            extra: Vec::new(),
        }
    }

    pub fn csrf(mut self) -> Self {
        self.csrf = true;
        self
    }

    pub fn no_csrf(mut self) -> Self {
        self.csrf = false;
        self
    }

    pub fn origin(mut self, origin: Option<&str>) -> Self {
        self.origin = origin.map(str::to_string);
        self
    }

    pub fn bearer(mut self, token: &str) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn session(mut self, token: &str) -> Self {
        self.session_cookie = Some(token.into());
        self
    }

    pub fn header(mut self, name: &'static str, value: &str) -> Self {
        self.extra.push((name, value.into()));
        self
    }

    pub fn build(self) -> Request<Body> {
        let mut builder = Request::builder()
            .method(self.method)
            .uri(self.uri)
            .header(HOST, TEST_HOST);
        if let Some(origin) = self.origin {
            builder = builder.header(ORIGIN, origin);
        }
        let mut cookies = Vec::new();
        if self.csrf {
            cookies.push(format!("csrfToken={CSRF}"));
            builder = builder.header("x-csrf-token", CSRF);
        }
        if let Some(token) = self.session_cookie {
            cookies.push(format!("auth={token}"));
        }
        if !cookies.is_empty() {
            builder = builder.header(COOKIE, cookies.join("; "));
        }
        if let Some(token) = self.bearer {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        for (name, value) in self.extra {
            builder = builder.header(name, value);
        }
        match self.body {
            Some(body) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }
}
