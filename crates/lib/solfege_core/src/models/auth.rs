//! Authentication domain models.
//!
//! These are internal domain models, distinct from the API request/response
//! shapes in `solfege_api::models` (which carry `camelCase` renames).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role name granted full administrative access.
pub const ADMIN_ROLE: &str = "admin";

/// Role name given to every self-registered account.
pub const USER_ROLE: &str = "user";

/// Domain user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: String,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == ADMIN_ROLE
    }
}

/// User with password hash (for internal auth flows).
#[derive(Debug, Clone)]
pub struct UserWithPassword {
    pub user: User,
    pub password_hash: String,
}

/// Input for creating an account.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
}

/// Purpose restriction carried by a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenScope {
    /// Only valid for completing a code-based password reset.
    PasswordReset,
}

/// JWT claims embedded in access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject - user ID (standard JWT `sub` claim).
    pub sub: String,
    /// Role name (e.g. `"admin"`).
    pub role: String,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Expiry (unix timestamp).
    pub exp: i64,
    /// Join key to an external record: an impersonation session or a reset record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<TokenScope>,
}

impl TokenClaims {
    /// An impersonation token is an unscoped token carrying a `jti`.
    pub fn impersonation_jti(&self) -> Option<&str> {
        match self.scope {
            None => self.jti.as_deref(),
            Some(_) => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == ADMIN_ROLE
    }
}

/// Optional claims added on top of `{sub, role, iat, exp}`.
#[derive(Debug, Clone, Default)]
pub struct ExtraClaims {
    pub jti: Option<String>,
    pub scope: Option<TokenScope>,
}

impl ExtraClaims {
    pub fn impersonation(jti: impl Into<String>) -> Self {
        Self {
            jti: Some(jti.into()),
            scope: None,
        }
    }

    pub fn password_reset(record_id: impl Into<String>) -> Self {
        Self {
            jti: Some(record_id.into()),
            scope: Some(TokenScope::PasswordReset),
        }
    }
}

/// Admin-issued impersonation session, joined to its token by `jti`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpersonationSession {
    pub jti: String,
    pub admin_id: String,
    #[serde(rename = "userId")]
    pub target_user_id: String,
    #[serde(rename = "role")]
    pub target_role: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

impl ImpersonationSession {
    /// Revoked explicitly or past its expiry.
    pub fn is_dead_at(&self, now: DateTime<Utc>) -> bool {
        self.revoked || now >= self.expires_at
    }

    /// Copy with `revoked` replaced by the derived predicate.
    pub fn with_effective_revocation(mut self, now: DateTime<Utc>) -> Self {
        self.revoked = self.is_dead_at(now);
        self
    }

    pub fn matches(&self, filter: &SessionFilter) -> bool {
        filter
            .admin_id
            .as_deref()
            .is_none_or(|id| id == self.admin_id)
            && filter
                .user_id
                .as_deref()
                .is_none_or(|id| id == self.target_user_id)
    }
}

/// Filter for listing and bulk-revoking impersonation sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionFilter {
    pub admin_id: Option<String>,
    pub user_id: Option<String>,
}

impl SessionFilter {
    pub fn by_admin(admin_id: impl Into<String>) -> Self {
        Self {
            admin_id: Some(admin_id.into()),
            user_id: None,
        }
    }

    pub fn by_user(user_id: impl Into<String>) -> Self {
        Self {
            admin_id: None,
            user_id: Some(user_id.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.admin_id.is_none() && self.user_id.is_none()
    }
}

/// Which reset flow a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetKind {
    /// Six-digit code delivered by SMS (or e-mail when no phone is on file).
    Code,
    /// Opaque token delivered as an e-mail link.
    Link,
}

impl ResetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResetKind::Code => "code",
            ResetKind::Link => "link",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "code" => Some(ResetKind::Code),
            "link" => Some(ResetKind::Link),
            _ => None,
        }
    }
}

/// Persisted password reset request.
///
/// `secret` holds the six-digit code for [`ResetKind::Code`] and the SHA-256
/// hex digest of the link token for [`ResetKind::Link`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordResetRecord {
    pub id: String,
    pub user_id: String,
    pub kind: ResetKind,
    pub secret: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub attempts: i32,
}

impl PasswordResetRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
