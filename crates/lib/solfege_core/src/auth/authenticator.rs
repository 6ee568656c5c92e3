//! Request authentication: the stateless token check joined with the
//! stateful revocation check.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::AuthError;
use super::jwt::TokenAuthority;
use super::sessions::SessionRegistry;
use crate::models::auth::TokenClaims;

/// Where the presented credential came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Bearer,
    Cookie,
}

/// Pick the credential to authenticate.
///
/// A present `Authorization` header is used exclusively, even when a session
/// cookie is also sent; a malformed header does not fall through to the cookie.
pub fn select_credential<'a>(
    authorization: Option<&'a str>,
    cookie: Option<&'a str>,
) -> Result<(CredentialSource, &'a str), AuthError> {
    if let Some(header) = authorization {
        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::InvalidToken)?;
        return Ok((CredentialSource::Bearer, token));
    }
    match cookie.filter(|c| !c.is_empty()) {
        Some(token) => Ok((CredentialSource::Cookie, token)),
        None => Err(AuthError::InvalidToken),
    }
}

pub struct Authenticator {
    tokens: Arc<TokenAuthority>,
    sessions: Arc<SessionRegistry>,
}

impl Authenticator {
    pub fn new(tokens: Arc<TokenAuthority>, sessions: Arc<SessionRegistry>) -> Self {
        Self { tokens, sessions }
    }

    /// Claims of a usable session token.
    ///
    /// Scoped tokens are refused here; they only open their own flow.
    /// Impersonation tokens are additionally checked against the registry.
    pub async fn authenticate(&self, token: &str) -> Result<TokenClaims, AuthError> {
        self.authenticate_at(token, Utc::now()).await
    }

    pub async fn authenticate_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<TokenClaims, AuthError> {
        let claims = self.tokens.verify_at(token, now.timestamp())?;
        if claims.scope.is_some() {
            debug!(sub = %claims.sub, "scoped token presented as a session");
            return Err(AuthError::InvalidToken);
        }
        if let Some(jti) = claims.impersonation_jti()
            && self.sessions.is_revoked_at(jti, now).await
        {
            debug!(jti, "revoked impersonation token refused");
            return Err(AuthError::Revoked);
        }
        Ok(claims)
    }
}
