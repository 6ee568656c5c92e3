//! In-process backends for every storage and delivery trait.
//!
//! Used by tests and by local runs without a database. Each store can be
//! switched into an "unavailable" mode to exercise the degraded paths.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::audit::{AuditEntry, AuditSink};
use crate::auth::AuthError;
use crate::auth::reset::ResetStore;
use crate::auth::sessions::SessionStore;
use crate::auth::users::UserDirectory;
use crate::models::auth::{
    ImpersonationSession, NewUser, PasswordResetRecord, ResetKind, SessionFilter, User,
    UserWithPassword,
};
use crate::notify::{Notification, Notifier};
use crate::uuid::uuidv7;

fn unavailable() -> AuthError {
    AuthError::StoreUnavailable("memory store switched off".into())
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, ImpersonationSession>,
    unavailable: AtomicBool,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with [`AuthError::StoreUnavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn guard(&self) -> Result<(), AuthError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, session: &ImpersonationSession) -> Result<(), AuthError> {
        self.guard()?;
        self.sessions.insert(session.jti.clone(), session.clone());
        Ok(())
    }

    async fn find(&self, jti: &str) -> Result<Option<ImpersonationSession>, AuthError> {
        self.guard()?;
        Ok(self.sessions.get(jti).map(|s| s.clone()))
    }

    async fn revoke(&self, jti: &str) -> Result<bool, AuthError> {
        self.guard()?;
        Ok(match self.sessions.get_mut(jti) {
            Some(mut s) => {
                s.revoked = true;
                true
            }
            None => false,
        })
    }

    async fn revoke_matching(&self, filter: &SessionFilter) -> Result<u64, AuthError> {
        self.guard()?;
        let mut n = 0;
        for mut s in self.sessions.iter_mut() {
            if s.matches(filter) && !s.revoked {
                s.revoked = true;
                n += 1;
            }
        }
        Ok(n)
    }

    async fn list(
        &self,
        filter: &SessionFilter,
        limit: i64,
    ) -> Result<Vec<ImpersonationSession>, AuthError> {
        self.guard()?;
        let mut rows: Vec<_> = self
            .sessions
            .iter()
            .filter(|s| s.matches(filter))
            .map(|s| s.clone())
            .collect();
        rows.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }
}

// ---------------------------------------------------------------------------
// Reset records
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryResetStore {
    records: DashMap<String, PasswordResetRecord>,
    unavailable: AtomicBool,
}

impl MemoryResetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Snapshot of all records, oldest first.
    pub fn records(&self) -> Vec<PasswordResetRecord> {
        let mut all: Vec<_> = self.records.iter().map(|r| r.clone()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        all
    }

    fn guard(&self) -> Result<(), AuthError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(())
    }

    fn newest(
        &self,
        pred: impl Fn(&PasswordResetRecord) -> bool,
    ) -> Option<PasswordResetRecord> {
        self.records
            .iter()
            .filter(|r| pred(r))
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .map(|r| r.clone())
    }
}

#[async_trait]
impl ResetStore for MemoryResetStore {
    async fn insert(&self, record: &PasswordResetRecord) -> Result<(), AuthError> {
        self.guard()?;
        self.records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<PasswordResetRecord>, AuthError> {
        self.guard()?;
        Ok(self.records.get(id).map(|r| r.clone()))
    }

    async fn find_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<PasswordResetRecord>, AuthError> {
        self.guard()?;
        Ok(self.newest(|r| r.kind == ResetKind::Link && r.secret == token_hash))
    }

    async fn latest_unused_code(
        &self,
        user_id: &str,
    ) -> Result<Option<PasswordResetRecord>, AuthError> {
        self.guard()?;
        Ok(self.newest(|r| r.kind == ResetKind::Code && r.user_id == user_id && !r.used))
    }

    async fn claim_attempt(&self, id: &str, max: i32) -> Result<Option<i32>, AuthError> {
        self.guard()?;
        let Some(mut record) = self.records.get_mut(id) else {
            return Ok(None);
        };
        if record.used || record.attempts >= max {
            return Ok(None);
        }
        record.attempts += 1;
        Ok(Some(record.attempts))
    }

    async fn release_attempt(&self, id: &str) -> Result<(), AuthError> {
        self.guard()?;
        if let Some(mut record) = self.records.get_mut(id) {
            record.attempts = (record.attempts - 1).max(0);
        }
        Ok(())
    }

    async fn consume(&self, id: &str, now: DateTime<Utc>) -> Result<bool, AuthError> {
        self.guard()?;
        // The shard lock held by `get_mut` makes check-and-set atomic.
        let Some(mut record) = self.records.get_mut(id) else {
            return Ok(false);
        };
        if record.used || record.is_expired_at(now) {
            return Ok(false);
        }
        record.used = true;
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryUserDirectory {
    users: DashMap<String, UserWithPassword>,
    unavailable: AtomicBool,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Attach a phone number to an existing account.
    pub fn set_phone(&self, user_id: &str, phone: &str) {
        if let Some(mut u) = self.users.get_mut(user_id) {
            u.user.phone = Some(phone.to_string());
        }
    }

    fn guard(&self) -> Result<(), AuthError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserWithPassword>, AuthError> {
        self.guard()?;
        Ok(self
            .users
            .iter()
            .find(|u| u.user.email.eq_ignore_ascii_case(email))
            .map(|u| u.clone()))
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<User>, AuthError> {
        self.guard()?;
        // Ids are UUIDv7, so the greatest id is the newest account.
        Ok(self
            .users
            .iter()
            .filter(|u| u.user.phone.as_deref() == Some(phone))
            .max_by(|a, b| a.user.id.cmp(&b.user.id))
            .map(|u| u.user.clone()))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, AuthError> {
        self.guard()?;
        Ok(self.users.get(id).map(|u| u.user.clone()))
    }

    async fn create_user(&self, new_user: NewUser) -> Result<User, AuthError> {
        self.guard()?;
        if self
            .users
            .iter()
            .any(|u| u.user.email.eq_ignore_ascii_case(&new_user.email))
        {
            return Err(AuthError::Conflict("Email already registered".into()));
        }
        let user = User {
            id: uuidv7().to_string(),
            name: new_user.name,
            email: new_user.email,
            phone: None,
            role: new_user.role,
        };
        self.users.insert(
            user.id.clone(),
            UserWithPassword {
                user: user.clone(),
                password_hash: new_user.password_hash,
            },
        );
        Ok(user)
    }

    async fn update_password_hash(&self, user_id: &str, hash: &str) -> Result<(), AuthError> {
        self.guard()?;
        let mut u = self.users.get_mut(user_id).ok_or(AuthError::RecordNotFound)?;
        u.password_hash = hash.to_string();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Audit and notifications
// ---------------------------------------------------------------------------

/// Audit sink that keeps entries in memory.
#[derive(Default)]
pub struct RecordingAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
    failing: AtomicBool,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<(), AuthError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.entries
            .lock()
            .map_err(|_| AuthError::Internal("audit buffer poisoned".into()))?
            .push(entry);
        Ok(())
    }
}

/// Notifier that captures messages instead of delivering them.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: Notification) -> Result<(), AuthError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AuthError::Internal("delivery failed".into()));
        }
        self.sent
            .lock()
            .map_err(|_| AuthError::Internal("notification buffer poisoned".into()))?
            .push(notification);
        Ok(())
    }
}
