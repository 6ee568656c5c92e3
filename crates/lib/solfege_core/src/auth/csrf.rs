//! Double-submit CSRF protection and same-origin checks.
//!
//! The anti-forgery value lives only in a readable cookie; a state-changing
//! request must echo it in the `x-csrf-token` header. Nothing is stored
//! server-side.

use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use subtle::ConstantTimeEq;
use url::Url;

use super::AuthError;

/// Cookie carrying the anti-forgery value.
pub const CSRF_COOKIE: &str = "csrfToken";

/// Request header that must echo the cookie value.
pub const CSRF_HEADER: &str = "x-csrf-token";

const CSRF_TOKEN_LEN: usize = 48;

/// Stateless double-submit guard.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsrfGuard;

impl CsrfGuard {
    /// Fresh opaque value; rotate by issuing again.
    pub fn issue(&self) -> String {
        rng()
            .sample_iter(&Alphanumeric)
            .take(CSRF_TOKEN_LEN)
            .map(char::from)
            .collect()
    }

    /// True iff both values are present, non-empty and byte-equal.
    pub fn validate(&self, cookie: Option<&str>, header: Option<&str>) -> bool {
        match (cookie, header) {
            (Some(c), Some(h)) if !c.is_empty() && !h.is_empty() => {
                c.as_bytes().ct_eq(h.as_bytes()).into()
            }
            _ => false,
        }
    }

    /// Same-origin check followed by the double-submit check.
    pub fn check(
        &self,
        origin: Option<&str>,
        host: Option<&str>,
        cookie: Option<&str>,
        header: Option<&str>,
    ) -> Result<(), AuthError> {
        if !verify_origin(origin, host) {
            return Err(AuthError::OriginRejected);
        }
        if !self.validate(cookie, header) {
            return Err(AuthError::CsrfRejected);
        }
        Ok(())
    }
}

/// True iff the `Origin` URL's authority equals the `Host` header.
///
/// Ports are compared after filling in the scheme's default, so
/// `https://host` and `host:443` agree.
pub fn verify_origin(origin: Option<&str>, host: Option<&str>) -> bool {
    let (Some(origin), Some(host)) = (origin, host) else {
        return false;
    };
    let Ok(origin) = Url::parse(origin) else {
        return false;
    };
    let host = host.trim();
    if host.is_empty() || host.contains(['/', '\\', '@', '?', '#']) {
        return false;
    }
    // Read the Host header as an authority under the origin's scheme.
    let Ok(served) = Url::parse(&format!("{}://{host}", origin.scheme())) else {
        return false;
    };
    match (origin.host_str(), served.host_str()) {
        (Some(a), Some(b)) => {
            a.eq_ignore_ascii_case(b)
                && origin.port_or_known_default() == served.port_or_known_default()
        }
        _ => false,
    }
}
