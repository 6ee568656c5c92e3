//! JWT token generation and verification.

use std::path::{Path, PathBuf};

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use tracing::{info, warn};

use super::AuthError;
use crate::models::auth::{ExtraClaims, TokenClaims};

/// Login session lifetime: 1 hour.
pub const SESSION_TTL_SECS: i64 = 60 * 60;

/// Impersonation token lifetime: 30 minutes.
pub const IMPERSONATION_TTL_SECS: i64 = 30 * 60;

/// Password-reset scoped token lifetime: 10 minutes.
pub const RESET_TOKEN_TTL_SECS: i64 = 10 * 60;

/// Signs and verifies HS256 access tokens with one process-wide secret.
///
/// Verification is pure: it depends only on the token and the clock, and never
/// consults the session registry. Revocation is layered on by
/// [`super::authenticator::Authenticator`].
#[derive(Clone)]
pub struct TokenAuthority {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl std::fmt::Debug for TokenAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthority").finish_non_exhaustive()
    }
}

impl TokenAuthority {
    pub fn new(secret: &[u8]) -> Result<Self, AuthError> {
        if secret.is_empty() {
            return Err(AuthError::Internal("signing secret is empty".into()));
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        })
    }

    /// Issue a token for `subject` valid for `ttl_secs` from now.
    pub fn issue(
        &self,
        subject: &str,
        role: &str,
        extra: ExtraClaims,
        ttl_secs: i64,
    ) -> Result<String, AuthError> {
        self.issue_at(subject, role, extra, ttl_secs, Utc::now().timestamp())
    }

    pub fn issue_at(
        &self,
        subject: &str,
        role: &str,
        extra: ExtraClaims,
        ttl_secs: i64,
        now: i64,
    ) -> Result<String, AuthError> {
        let claims = TokenClaims {
            sub: subject.to_string(),
            role: role.to_string(),
            iat: now,
            exp: now + ttl_secs,
            jti: extra.jti,
            scope: extra.scope,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("jwt encode: {e}")))
    }

    /// Verify signature and expiry against the wall clock.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, AuthError> {
        self.verify_at(token, Utc::now().timestamp())
    }

    /// Verify signature and expiry against `now` (unix seconds).
    ///
    /// Valid iff the signature checks out and `now < exp`. Any failure yields
    /// [`AuthError::InvalidToken`], never partial claims.
    pub fn verify_at(&self, token: &str, now: i64) -> Result<TokenClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked below against the supplied clock, without leeway.
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims = decode::<TokenClaims>(token, &self.decoding, &validation)
            .map_err(|_| AuthError::InvalidToken)?
            .claims;

        if now >= claims.exp {
            return Err(AuthError::InvalidToken);
        }
        Ok(claims)
    }
}

/// Resolve the JWT secret: env var `JWT_SECRET` → `AUTH_SECRET` → persisted file.
pub fn resolve_jwt_secret() -> String {
    if let Ok(secret) = std::env::var("JWT_SECRET")
        && !secret.is_empty()
    {
        return secret;
    }
    if let Ok(secret) = std::env::var("AUTH_SECRET")
        && !secret.is_empty()
    {
        return secret;
    }
    secret_from_file(&jwt_secret_path())
}

/// Read the secret at `secret_path`, or generate and try to persist one.
///
/// A failed write still yields a usable secret; sessions then only
/// outlive the process if a later start can write the file.
fn secret_from_file(secret_path: &Path) -> String {
    if let Ok(existing) = std::fs::read_to_string(secret_path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    let secret: String = rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect();
    if let Some(parent) = secret_path.parent()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        warn!(path = %parent.display(), error = %e, "cannot create JWT secret directory");
    }
    match std::fs::write(secret_path, &secret) {
        Ok(()) => info!(path = %secret_path.display(), "generated new JWT secret"),
        Err(e) => warn!(
            path = %secret_path.display(),
            error = %e,
            "generated JWT secret could not be persisted"
        ),
    }
    secret
}

/// Path to the persisted JWT secret file.
fn jwt_secret_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("solfege")
        .join("jwt-secret")
}
