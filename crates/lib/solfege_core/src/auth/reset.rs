//! Password reset flows.
//!
//! Two independent state machines share one lifecycle
//! (`Requested → Consumed | Expired | AttemptsExhausted`):
//!
//! * **Link**: an opaque token mailed as a URL, valid for 24 hours, single use.
//!   [`PasswordResetFlow::validate_link`] can be polled without consuming it.
//! * **Code**: a six-digit code valid for 15 minutes, permanently rejected after
//!   three wrong guesses. A correct guess yields a short-lived token scoped to
//!   `password_reset` whose `jti` is the record id; the reset itself is gated
//!   on both that token and the record, the same stateless-plus-stateful join
//!   used for impersonation.
//!
//! Unknown or used records are reported uniformly; expiry is reported
//! distinctly in both flows.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use rand::{Rng, RngCore, rng};
use serde::Serialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::info;
use url::Url;

use super::AuthError;
use super::jwt::{RESET_TOKEN_TTL_SECS, TokenAuthority};
use super::password::{ensure_password_complexity, hash_password, is_phone, validate_email};
use super::users::UserDirectory;
use crate::audit::{AuditEntry, AuditSink, record_quietly};
use crate::models::auth::{ExtraClaims, PasswordResetRecord, ResetKind, TokenScope, User};
use crate::notify::{Channel, Locale, Notification, Notifier, send_quietly};
use crate::uuid::uuidv7;

/// Link validity: 24 hours.
pub const LINK_TTL: Duration = Duration::hours(24);

/// Code validity: 15 minutes.
pub const CODE_TTL: Duration = Duration::minutes(15);

/// Wrong code submissions tolerated per record.
pub const MAX_CODE_ATTEMPTS: i32 = 3;

/// Durable storage for reset records.
#[async_trait]
pub trait ResetStore: Send + Sync {
    async fn insert(&self, record: &PasswordResetRecord) -> Result<(), AuthError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<PasswordResetRecord>, AuthError>;

    /// Newest link record with this token digest.
    async fn find_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<PasswordResetRecord>, AuthError>;

    /// Newest unused code record for the user.
    async fn latest_unused_code(
        &self,
        user_id: &str,
    ) -> Result<Option<PasswordResetRecord>, AuthError>;

    /// Take one attempt slot before a code is compared.
    ///
    /// Atomically increments `attempts` only while it is below `max` and the
    /// record is unused. `None` means no slot was left.
    async fn claim_attempt(&self, id: &str, max: i32) -> Result<Option<i32>, AuthError>;

    /// Give back a slot taken by [`Self::claim_attempt`] for a correct code.
    async fn release_attempt(&self, id: &str) -> Result<(), AuthError>;

    /// Flip `used` from false to true while unexpired at `now`.
    ///
    /// Returns `false` when another caller got there first or the record
    /// expired, so at most one reset consumes a record.
    async fn consume(&self, id: &str, now: DateTime<Utc>) -> Result<bool, AuthError>;
}

/// Why a link is not usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkInvalidReason {
    Invalid,
    Expired,
}

/// Non-consuming view of a reset link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkStatus {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<LinkInvalidReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    pub remaining_ms: i64,
}

impl LinkStatus {
    fn invalid() -> Self {
        Self {
            valid: false,
            reason: Some(LinkInvalidReason::Invalid),
            expires_at: None,
            created_at: None,
            remaining_ms: 0,
        }
    }
}

/// Both reset flows over one record store.
pub struct PasswordResetFlow {
    users: Arc<dyn UserDirectory>,
    store: Arc<dyn ResetStore>,
    tokens: Arc<TokenAuthority>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditSink>,
    base_url: Url,
}

impl PasswordResetFlow {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        store: Arc<dyn ResetStore>,
        tokens: Arc<TokenAuthority>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditSink>,
        base_url: Url,
    ) -> Self {
        Self {
            users,
            store,
            tokens,
            notifier,
            audit,
            base_url,
        }
    }

    // -----------------------------------------------------------------------
    // Link flow
    // -----------------------------------------------------------------------

    /// Mail a reset link. Unknown addresses succeed silently.
    pub async fn request_link(&self, email: &str, locale: Locale) -> Result<(), AuthError> {
        let email = email.trim();
        if !validate_email(email) {
            return Err(AuthError::ValidationFailed("Invalid email".into()));
        }
        let Some(found) = self.users.find_by_email(email).await? else {
            info!("password reset link requested for unknown account");
            return Ok(());
        };
        let user = found.user;

        let token = generate_link_token();
        let now = Utc::now();
        let record = PasswordResetRecord {
            id: uuidv7().to_string(),
            user_id: user.id.clone(),
            kind: ResetKind::Link,
            secret: hash_token(&token),
            created_at: now,
            expires_at: now + LINK_TTL,
            used: false,
            attempts: 0,
        };
        self.store.insert(&record).await?;

        let link = self
            .base_url
            .join(&format!("reset-password/{token}"))
            .map_err(|e| AuthError::Internal(format!("reset link: {e}")))?;
        send_quietly(self.notifier.as_ref(), link_email(&user.email, &link, locale)).await;

        info!(user_id = %user.id, expires_at = %record.expires_at, "password reset link sent");
        Ok(())
    }

    /// Report whether a link token is usable. Never consumes it.
    pub async fn validate_link(&self, token: &str) -> Result<LinkStatus, AuthError> {
        self.validate_link_at(token, Utc::now()).await
    }

    pub async fn validate_link_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<LinkStatus, AuthError> {
        if token.is_empty() {
            return Err(AuthError::ValidationFailed("Token required".into()));
        }
        let record = self
            .store
            .find_by_token_hash(&hash_token(token))
            .await?
            .filter(|r| r.kind == ResetKind::Link && !r.used);
        let Some(record) = record else {
            return Ok(LinkStatus::invalid());
        };

        let remaining_ms = (record.expires_at - now).num_milliseconds().max(0);
        if record.is_expired_at(now) {
            info!(user_id = %record.user_id, expires_at = %record.expires_at, "expired reset link accessed");
            return Ok(LinkStatus {
                valid: false,
                reason: Some(LinkInvalidReason::Expired),
                expires_at: Some(record.expires_at),
                created_at: Some(record.created_at),
                remaining_ms: 0,
            });
        }
        Ok(LinkStatus {
            valid: true,
            reason: None,
            expires_at: Some(record.expires_at),
            created_at: Some(record.created_at),
            remaining_ms,
        })
    }

    /// Consume a link token and set the new password.
    pub async fn reset_with_link(
        &self,
        token: &str,
        password: &str,
        confirm: &str,
    ) -> Result<(), AuthError> {
        self.reset_with_link_at(token, password, confirm, Utc::now())
            .await
    }

    pub async fn reset_with_link_at(
        &self,
        token: &str,
        password: &str,
        confirm: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        if token.is_empty() {
            return Err(AuthError::ValidationFailed("Token required".into()));
        }
        if password != confirm {
            return Err(AuthError::ValidationFailed("Passwords do not match".into()));
        }
        ensure_password_complexity(password)?;

        let record = self
            .store
            .find_by_token_hash(&hash_token(token))
            .await?
            .filter(|r| r.kind == ResetKind::Link)
            .ok_or(AuthError::RecordNotFound)?;
        if record.used {
            return Err(AuthError::AlreadyUsed);
        }
        if record.is_expired_at(now) {
            info!(user_id = %record.user_id, expires_at = %record.expires_at, "reset attempted with expired link");
            return Err(AuthError::RecordExpired);
        }

        self.complete(&record, &record.user_id, password, now).await
    }

    // -----------------------------------------------------------------------
    // Code flow
    // -----------------------------------------------------------------------

    /// Send a six-digit code by SMS, or by e-mail when no phone is on file.
    /// Unknown accounts succeed silently.
    pub async fn request_code(&self, email_or_phone: &str, locale: Locale) -> Result<(), AuthError> {
        let value = email_or_phone.trim();
        let Some(user) = self.resolve_account(value).await? else {
            info!("password reset code requested for unknown account");
            return Ok(());
        };

        let code = generate_code();
        let now = Utc::now();
        let record = PasswordResetRecord {
            id: uuidv7().to_string(),
            user_id: user.id.clone(),
            kind: ResetKind::Code,
            secret: code.clone(),
            created_at: now,
            expires_at: now + CODE_TTL,
            used: false,
            attempts: 0,
        };
        self.store.insert(&record).await?;

        let phone = user
            .phone
            .clone()
            .or_else(|| is_phone(value).then(|| value.to_string()));
        send_quietly(self.notifier.as_ref(), code_message(&user, phone, &code, locale)).await;

        info!(user_id = %user.id, "password reset code sent");
        Ok(())
    }

    /// Check a code; on success return a token scoped to `password_reset`.
    pub async fn verify_code(&self, email_or_phone: &str, code: &str) -> Result<String, AuthError> {
        self.verify_code_at(email_or_phone, code, Utc::now()).await
    }

    pub async fn verify_code_at(
        &self,
        email_or_phone: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let user = self
            .resolve_account(email_or_phone.trim())
            .await?
            .ok_or(AuthError::RecordNotFound)?;
        let record = self
            .store
            .latest_unused_code(&user.id)
            .await?
            .ok_or(AuthError::RecordNotFound)?;

        if record.attempts >= MAX_CODE_ATTEMPTS {
            return Err(AuthError::AttemptsExhausted);
        }
        if record.is_expired_at(now) {
            return Err(AuthError::RecordExpired);
        }
        // The slot is taken before comparing, so concurrent guesses cannot
        // all slip under the ceiling.
        let Some(attempts) = self
            .store
            .claim_attempt(&record.id, MAX_CODE_ATTEMPTS)
            .await?
        else {
            return Err(AuthError::AttemptsExhausted);
        };
        let matches: bool = record.secret.as_bytes().ct_eq(code.trim().as_bytes()).into();
        if !matches {
            info!(user_id = %user.id, attempts, "wrong password reset code");
            return Err(AuthError::InvalidCredentials);
        }
        self.store.release_attempt(&record.id).await?;

        let token = self.tokens.issue_at(
            &user.id,
            &user.role,
            ExtraClaims::password_reset(record.id.clone()),
            RESET_TOKEN_TTL_SECS,
            now.timestamp(),
        )?;
        info!(user_id = %user.id, "password reset code verified");
        Ok(token)
    }

    /// Set the new password using a token from [`Self::verify_code`].
    pub async fn reset_with_code(&self, scoped_token: &str, password: &str) -> Result<(), AuthError> {
        self.reset_with_code_at(scoped_token, password, Utc::now())
            .await
    }

    pub async fn reset_with_code_at(
        &self,
        scoped_token: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        ensure_password_complexity(password)?;

        let claims = self.tokens.verify_at(scoped_token, now.timestamp())?;
        if claims.scope != Some(TokenScope::PasswordReset) {
            return Err(AuthError::InvalidToken);
        }
        let record_id = claims.jti.as_deref().ok_or(AuthError::InvalidToken)?;

        let record = self
            .store
            .find_by_id(record_id)
            .await?
            .filter(|r| r.kind == ResetKind::Code)
            .ok_or(AuthError::RecordNotFound)?;
        if record.user_id != claims.sub {
            return Err(AuthError::InvalidToken);
        }
        if record.used {
            return Err(AuthError::AlreadyUsed);
        }
        if record.is_expired_at(now) {
            return Err(AuthError::RecordExpired);
        }

        self.complete(&record, &claims.sub, password, now).await
    }

    // -----------------------------------------------------------------------
    // Shared steps
    // -----------------------------------------------------------------------

    async fn resolve_account(&self, value: &str) -> Result<Option<User>, AuthError> {
        if value.is_empty() {
            return Err(AuthError::ValidationFailed("Email or phone required".into()));
        }
        if is_phone(value) {
            return self.users.find_by_phone(value).await;
        }
        if validate_email(value) {
            return Ok(self.users.find_by_email(value).await?.map(|u| u.user));
        }
        Err(AuthError::ValidationFailed("Invalid email or phone".into()))
    }

    /// Consume the record, then write the new hash. Only the caller that wins
    /// the consume proceeds to touch the password.
    async fn complete(
        &self,
        record: &PasswordResetRecord,
        user_id: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let hash = hash_password(password)?;
        if !self.store.consume(&record.id, now).await? {
            return Err(AuthError::AlreadyUsed);
        }
        self.users.update_password_hash(user_id, &hash).await?;

        record_quietly(
            self.audit.as_ref(),
            AuditEntry::new("UPDATE", "PasswordReset", &record.id, Some(user_id))
                .with_metadata(serde_json::json!({ "flow": record.kind.as_str() })),
        )
        .await;
        info!(user_id, flow = record.kind.as_str(), "password reset completed");
        Ok(())
    }
}

/// 24 random bytes, URL-safe base64 without padding.
fn generate_link_token() -> String {
    let mut bytes = [0u8; 24];
    rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn generate_code() -> String {
    rng().random_range(100_000..1_000_000u32).to_string()
}

/// SHA-256 hash a link token for storage.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn link_email(to: &str, link: &Url, locale: Locale) -> Notification {
    let (subject, body) = match locale {
        Locale::En => (
            "Password reset",
            format!(
                "You requested a password reset. Open the link below to create a new password.\n\n{link}\n\nThis link expires in 24 hours. If you did not request this, you can ignore this email."
            ),
        ),
        Locale::Pt => (
            "Redefinição de senha",
            format!(
                "Você solicitou a redefinição de senha. Abra o link abaixo para definir uma nova senha.\n\n{link}\n\nEste link expira em 24 horas. Se você não solicitou, pode ignorar este email."
            ),
        ),
    };
    Notification {
        channel: Channel::Email {
            to: to.to_string(),
            subject: subject.to_string(),
        },
        body,
    }
}

fn code_message(user: &User, phone: Option<String>, code: &str, locale: Locale) -> Notification {
    let body = match locale {
        Locale::En => format!("Your verification code is {code}"),
        Locale::Pt => format!("Seu código de verificação é {code}"),
    };
    let channel = match phone {
        Some(to) => Channel::Sms { to },
        None => Channel::Email {
            to: user.email.clone(),
            subject: match locale {
                Locale::En => "Verification code".to_string(),
                Locale::Pt => "Código de verificação".to_string(),
            },
        },
    };
    Notification { channel, body }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::verify_password;
    use crate::memory::{MemoryResetStore, MemoryUserDirectory, RecordingAuditSink, RecordingNotifier};
    use crate::models::auth::NewUser;

    const OLD_PASSWORD: &str = "Cello#1900";
    const NEW_PASSWORD: &str = "Viola&2025";

    struct Fixture {
        flow: PasswordResetFlow,
        users: Arc<MemoryUserDirectory>,
        store: Arc<MemoryResetStore>,
        notifier: Arc<RecordingNotifier>,
        audit: Arc<RecordingAuditSink>,
        tokens: Arc<TokenAuthority>,
        user: User,
    }

    async fn fixture(phone: Option<&str>) -> Fixture {
        let users = Arc::new(MemoryUserDirectory::new());
        let user = users
            .create_user(NewUser {
                name: "Ana".into(),
                email: "ana@escola.example".into(),
                password_hash: hash_password(OLD_PASSWORD).unwrap(),
                role: "teacher".into(),
            })
            .await
            .unwrap();
        if let Some(phone) = phone {
            users.set_phone(&user.id, phone);
        }
        let user = users.find_by_id(&user.id).await.unwrap().unwrap();

        let store = Arc::new(MemoryResetStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let audit = Arc::new(RecordingAuditSink::new());
        let tokens = Arc::new(TokenAuthority::new(b"reset-secret").unwrap());
        let flow = PasswordResetFlow::new(
            users.clone(),
            store.clone(),
            tokens.clone(),
            notifier.clone(),
            audit.clone(),
            Url::parse("https://escola.example/").unwrap(),
        );
        Fixture {
            flow,
            users,
            store,
            notifier,
            audit,
            tokens,
            user,
        }
    }

    fn link_token(notifier: &RecordingNotifier) -> String {
        let sent = notifier.sent();
        let body = &sent.last().expect("a notification").body;
        let start = body.find("reset-password/").expect("link in body") + "reset-password/".len();
        body[start..]
            .split_whitespace()
            .next()
            .unwrap()
            .to_string()
    }

    async fn password_is(f: &Fixture, password: &str) -> bool {
        let stored = f.users.find_by_email(&f.user.email).await.unwrap().unwrap();
        verify_password(password, &stored.password_hash).unwrap()
    }

    // Link flow -------------------------------------------------------------

    #[tokio::test]
    async fn link_validates_repeatedly_then_resets_once() {
        let f = fixture(None).await;
        f.flow.request_link("ana@escola.example", Locale::En).await.unwrap();
        let token = link_token(&f.notifier);
        assert!(matches!(
            &f.notifier.sent()[0].channel,
            Channel::Email { to, subject } if to == "ana@escola.example" && subject == "Password reset"
        ));

        for _ in 0..3 {
            let status = f.flow.validate_link(&token).await.unwrap();
            assert!(status.valid);
            assert!(status.remaining_ms > 0);
        }

        f.flow
            .reset_with_link(&token, NEW_PASSWORD, NEW_PASSWORD)
            .await
            .unwrap();
        assert!(password_is(&f, NEW_PASSWORD).await);
        assert_eq!(f.audit.entries().len(), 1);

        assert!(matches!(
            f.flow.reset_with_link(&token, NEW_PASSWORD, NEW_PASSWORD).await,
            Err(AuthError::AlreadyUsed)
        ));
        let status = f.flow.validate_link(&token).await.unwrap();
        assert_eq!(status.reason, Some(LinkInvalidReason::Invalid));
    }

    #[tokio::test]
    async fn link_expires_without_any_reset() {
        let f = fixture(None).await;
        f.flow.request_link("ana@escola.example", Locale::Pt).await.unwrap();
        let token = link_token(&f.notifier);
        let later = Utc::now() + LINK_TTL + Duration::seconds(1);

        assert!(f.flow.validate_link(&token).await.unwrap().valid);
        let status = f.flow.validate_link_at(&token, later).await.unwrap();
        assert!(!status.valid);
        assert_eq!(status.reason, Some(LinkInvalidReason::Expired));
        assert_eq!(status.remaining_ms, 0);

        assert!(matches!(
            f.flow
                .reset_with_link_at(&token, NEW_PASSWORD, NEW_PASSWORD, later)
                .await,
            Err(AuthError::RecordExpired)
        ));
        assert!(password_is(&f, OLD_PASSWORD).await);
    }

    #[tokio::test]
    async fn link_rejects_bad_input_before_touching_records() {
        let f = fixture(None).await;
        f.flow.request_link("ana@escola.example", Locale::Pt).await.unwrap();
        let token = link_token(&f.notifier);

        assert!(matches!(
            f.flow.reset_with_link(&token, "weak", "weak").await,
            Err(AuthError::ValidationFailed(_))
        ));
        assert!(matches!(
            f.flow.reset_with_link(&token, NEW_PASSWORD, "Other#2025").await,
            Err(AuthError::ValidationFailed(_))
        ));
        assert!(f.flow.validate_link(&token).await.unwrap().valid);

        assert!(matches!(
            f.flow.reset_with_link("bogus", NEW_PASSWORD, NEW_PASSWORD).await,
            Err(AuthError::RecordNotFound)
        ));
        assert_eq!(
            f.flow.validate_link("bogus").await.unwrap().reason,
            Some(LinkInvalidReason::Invalid)
        );
    }

    #[tokio::test]
    async fn link_stores_only_a_digest() {
        let f = fixture(None).await;
        f.flow.request_link("ana@escola.example", Locale::Pt).await.unwrap();
        let token = link_token(&f.notifier);
        let records = f.store.records();
        assert_eq!(records.len(), 1);
        assert_ne!(records[0].secret, token);
        assert_eq!(records[0].secret, hash_token(&token));
    }

    #[tokio::test]
    async fn unknown_email_is_silent() {
        let f = fixture(None).await;
        f.flow.request_link("ghost@escola.example", Locale::Pt).await.unwrap();
        assert!(f.notifier.sent().is_empty());
        assert!(f.store.records().is_empty());

        assert!(matches!(
            f.flow.request_link("not-an-email", Locale::Pt).await,
            Err(AuthError::ValidationFailed(_))
        ));
    }

    // Code flow -------------------------------------------------------------

    #[tokio::test]
    async fn code_flow_end_to_end_by_phone() {
        let f = fixture(Some("+5511987654321")).await;
        f.flow.request_code("+5511987654321", Locale::Pt).await.unwrap();

        let sent = f.notifier.sent();
        assert!(matches!(&sent[0].channel, Channel::Sms { to } if to == "+5511987654321"));
        let code = f.store.records()[0].secret.clone();
        assert_eq!(code.len(), 6);
        assert!(sent[0].body.ends_with(&code));

        let token = f.flow.verify_code("+5511987654321", &code).await.unwrap();
        let claims = f.tokens.verify(&token).unwrap();
        assert_eq!(claims.scope, Some(TokenScope::PasswordReset));
        assert_eq!(claims.jti.as_deref(), Some(f.store.records()[0].id.as_str()));
        assert_eq!(claims.exp - claims.iat, RESET_TOKEN_TTL_SECS);

        f.flow.reset_with_code(&token, NEW_PASSWORD).await.unwrap();
        assert!(password_is(&f, NEW_PASSWORD).await);

        assert!(matches!(
            f.flow.reset_with_code(&token, NEW_PASSWORD).await,
            Err(AuthError::AlreadyUsed)
        ));
    }

    #[tokio::test]
    async fn code_without_phone_goes_by_email() {
        let f = fixture(None).await;
        f.flow.request_code("ana@escola.example", Locale::En).await.unwrap();
        let sent = f.notifier.sent();
        assert!(matches!(&sent[0].channel, Channel::Email { to, .. } if to == "ana@escola.example"));
        assert!(sent[0].body.starts_with("Your verification code is"));
    }

    #[tokio::test]
    async fn fourth_attempt_fails_even_with_correct_code() {
        let f = fixture(None).await;
        f.flow.request_code("ana@escola.example", Locale::Pt).await.unwrap();
        let code = f.store.records()[0].secret.clone();
        let wrong = if code == "000000" { "111111" } else { "000000" };

        for _ in 0..MAX_CODE_ATTEMPTS {
            assert!(matches!(
                f.flow.verify_code("ana@escola.example", wrong).await,
                Err(AuthError::InvalidCredentials)
            ));
        }
        assert!(matches!(
            f.flow.verify_code("ana@escola.example", &code).await,
            Err(AuthError::AttemptsExhausted)
        ));
    }

    #[tokio::test]
    async fn expired_code_is_reported_as_expired() {
        let f = fixture(None).await;
        f.flow.request_code("ana@escola.example", Locale::Pt).await.unwrap();
        let code = f.store.records()[0].secret.clone();
        let later = Utc::now() + CODE_TTL + Duration::seconds(1);
        assert!(matches!(
            f.flow.verify_code_at("ana@escola.example", &code, later).await,
            Err(AuthError::RecordExpired)
        ));
    }

    #[tokio::test]
    async fn reset_requires_reset_scope() {
        let f = fixture(None).await;
        f.flow.request_code("ana@escola.example", Locale::Pt).await.unwrap();
        let record_id = f.store.records()[0].id.clone();

        // Same jti, but an ordinary session token.
        let unscoped = f
            .tokens
            .issue(&f.user.id, &f.user.role, ExtraClaims::impersonation(record_id), 600)
            .unwrap();
        assert!(matches!(
            f.flow.reset_with_code(&unscoped, NEW_PASSWORD).await,
            Err(AuthError::InvalidToken)
        ));
        assert!(matches!(
            f.flow.reset_with_code("garbage", NEW_PASSWORD).await,
            Err(AuthError::InvalidToken)
        ));
        assert!(password_is(&f, OLD_PASSWORD).await);
    }

    #[tokio::test]
    async fn reset_after_record_expiry_fails_as_expired() {
        let f = fixture(None).await;
        f.flow.request_code("ana@escola.example", Locale::Pt).await.unwrap();
        let record = f.store.records()[0].clone();

        // Verified a minute before the record lapses, so the scoped token
        // outlives the record.
        let verified_at = record.expires_at - Duration::seconds(60);
        let token = f
            .flow
            .verify_code_at("ana@escola.example", &record.secret, verified_at)
            .await
            .unwrap();
        assert!(matches!(
            f.flow
                .reset_with_code_at(&token, NEW_PASSWORD, record.expires_at)
                .await,
            Err(AuthError::RecordExpired)
        ));
        assert!(password_is(&f, OLD_PASSWORD).await);
    }

    #[tokio::test]
    async fn weak_password_rejected_before_token_check() {
        let f = fixture(None).await;
        assert!(matches!(
            f.flow.reset_with_code("garbage", "weak").await,
            Err(AuthError::ValidationFailed(_))
        ));
    }

    #[tokio::test]
    async fn verify_for_unknown_account_is_uniform() {
        let f = fixture(None).await;
        assert!(matches!(
            f.flow.verify_code("ghost@escola.example", "123456").await,
            Err(AuthError::RecordNotFound)
        ));
        assert!(matches!(
            f.flow.verify_code("ana@escola.example", "123456").await,
            Err(AuthError::RecordNotFound)
        ));
    }

    #[tokio::test]
    async fn correct_code_does_not_spend_an_attempt() {
        let f = fixture(None).await;
        f.flow.request_code("ana@escola.example", Locale::Pt).await.unwrap();
        let code = f.store.records()[0].secret.clone();
        let wrong = if code == "000000" { "111111" } else { "000000" };

        for _ in 0..MAX_CODE_ATTEMPTS - 1 {
            let _ = f.flow.verify_code("ana@escola.example", wrong).await;
        }
        f.flow.verify_code("ana@escola.example", &code).await.unwrap();
        f.flow.verify_code("ana@escola.example", &code).await.unwrap();
        assert_eq!(f.store.records()[0].attempts, MAX_CODE_ATTEMPTS - 1);
    }

    /// Store whose code lookup takes a while, like a database round trip.
    struct SlowLookup(Arc<MemoryResetStore>);

    #[async_trait]
    impl ResetStore for SlowLookup {
        async fn insert(&self, record: &PasswordResetRecord) -> Result<(), AuthError> {
            self.0.insert(record).await
        }

        async fn find_by_id(&self, id: &str) -> Result<Option<PasswordResetRecord>, AuthError> {
            self.0.find_by_id(id).await
        }

        async fn find_by_token_hash(
            &self,
            token_hash: &str,
        ) -> Result<Option<PasswordResetRecord>, AuthError> {
            self.0.find_by_token_hash(token_hash).await
        }

        async fn latest_unused_code(
            &self,
            user_id: &str,
        ) -> Result<Option<PasswordResetRecord>, AuthError> {
            let found = self.0.latest_unused_code(user_id).await;
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            found
        }

        async fn claim_attempt(&self, id: &str, max: i32) -> Result<Option<i32>, AuthError> {
            self.0.claim_attempt(id, max).await
        }

        async fn release_attempt(&self, id: &str) -> Result<(), AuthError> {
            self.0.release_attempt(id).await
        }

        async fn consume(&self, id: &str, now: DateTime<Utc>) -> Result<bool, AuthError> {
            self.0.consume(id, now).await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_guesses_cannot_exceed_the_ceiling() {
        let f = fixture(None).await;
        let flow = Arc::new(PasswordResetFlow::new(
            f.users.clone(),
            Arc::new(SlowLookup(f.store.clone())),
            f.tokens.clone(),
            f.notifier.clone(),
            f.audit.clone(),
            Url::parse("https://escola.example/").unwrap(),
        ));
        flow.request_code("ana@escola.example", Locale::Pt).await.unwrap();
        let code = f.store.records()[0].secret.clone();
        let wrong = if code == "000000" { "111111" } else { "000000" };

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let flow = flow.clone();
                tokio::spawn(async move { flow.verify_code("ana@escola.example", wrong).await })
            })
            .collect();
        let mut evaluated = 0;
        let mut exhausted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Err(AuthError::InvalidCredentials) => evaluated += 1,
                Err(AuthError::AttemptsExhausted) => exhausted += 1,
                other => panic!("unexpected outcome: {other:?}"),
            }
        }

        assert_eq!(evaluated, MAX_CODE_ATTEMPTS);
        assert_eq!(exhausted, 20 - MAX_CODE_ATTEMPTS);
        assert_eq!(f.store.records()[0].attempts, MAX_CODE_ATTEMPTS);
        assert!(matches!(
            flow.verify_code("ana@escola.example", &code).await,
            Err(AuthError::AttemptsExhausted)
        ));
    }
}
