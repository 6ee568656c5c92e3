//! Cookie service: session and anti-forgery cookies.

use axum_extra::extract::cookie::{Cookie, SameSite};
use solfege_core::auth::csrf::CSRF_COOKIE;
use time::Duration;

/// Cookie carrying the primary session token.
pub const SESSION_COOKIE: &str = "auth";

/// httpOnly session cookie living as long as the token.
pub fn session_cookie(token: &str, max_age_secs: i64, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE.to_string(), token.to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/".to_string())
        .max_age(Duration::seconds(max_age_secs))
        .build()
}

/// Expired session cookie, for logout.
pub fn clear_session_cookie(secure: bool) -> Cookie<'static> {
    session_cookie("", 0, secure)
}

/// Readable anti-forgery cookie; client script echoes it in a header.
pub fn csrf_cookie(token: &str, secure: bool) -> Cookie<'static> {
    Cookie::build((CSRF_COOKIE.to_string(), token.to_string()))
        .http_only(false)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/".to_string())
        .build()
}
