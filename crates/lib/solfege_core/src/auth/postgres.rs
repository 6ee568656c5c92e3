//! PostgreSQL-backed stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::AuthError;
use super::queries;
use super::reset::ResetStore;
use super::sessions::SessionStore;
use super::users::UserDirectory;
use crate::models::auth::{
    ImpersonationSession, NewUser, PasswordResetRecord, SessionFilter, User, UserWithPassword,
};

pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserWithPassword>, AuthError> {
        queries::find_user_by_email(&self.pool, email).await
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<User>, AuthError> {
        queries::find_user_by_phone(&self.pool, phone).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, AuthError> {
        queries::get_user_by_id(&self.pool, id).await
    }

    async fn create_user(&self, new_user: NewUser) -> Result<User, AuthError> {
        if queries::email_exists(&self.pool, &new_user.email).await? {
            return Err(AuthError::Conflict("Email already registered".into()));
        }
        let id = queries::create_user(
            &self.pool,
            &new_user.name,
            &new_user.email,
            &new_user.password_hash,
            &new_user.role,
        )
        .await
        .map_err(|e| match e {
            // Lost a race against a concurrent registration.
            AuthError::Db(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                AuthError::Conflict("Email already registered".into())
            }
            other => other,
        })?;
        Ok(User {
            id,
            name: new_user.name,
            email: new_user.email,
            phone: None,
            role: new_user.role,
        })
    }

    async fn update_password_hash(&self, user_id: &str, hash: &str) -> Result<(), AuthError> {
        if queries::update_password_hash(&self.pool, user_id, hash).await? {
            Ok(())
        } else {
            Err(AuthError::RecordNotFound)
        }
    }
}

pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn insert(&self, session: &ImpersonationSession) -> Result<(), AuthError> {
        queries::insert_session(&self.pool, session).await
    }

    async fn find(&self, jti: &str) -> Result<Option<ImpersonationSession>, AuthError> {
        queries::find_session(&self.pool, jti).await
    }

    async fn revoke(&self, jti: &str) -> Result<bool, AuthError> {
        queries::revoke_session(&self.pool, jti).await
    }

    async fn revoke_matching(&self, filter: &SessionFilter) -> Result<u64, AuthError> {
        queries::revoke_sessions_matching(&self.pool, filter).await
    }

    async fn list(
        &self,
        filter: &SessionFilter,
        limit: i64,
    ) -> Result<Vec<ImpersonationSession>, AuthError> {
        queries::list_sessions(&self.pool, filter, limit).await
    }
}

pub struct PgResetStore {
    pool: PgPool,
}

impl PgResetStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResetStore for PgResetStore {
    async fn insert(&self, record: &PasswordResetRecord) -> Result<(), AuthError> {
        queries::insert_reset(&self.pool, record).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<PasswordResetRecord>, AuthError> {
        queries::find_reset_by_id(&self.pool, id).await
    }

    async fn find_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<PasswordResetRecord>, AuthError> {
        queries::find_reset_by_token_hash(&self.pool, token_hash).await
    }

    async fn latest_unused_code(
        &self,
        user_id: &str,
    ) -> Result<Option<PasswordResetRecord>, AuthError> {
        queries::latest_unused_code(&self.pool, user_id).await
    }

    async fn claim_attempt(&self, id: &str, max: i32) -> Result<Option<i32>, AuthError> {
        queries::claim_reset_attempt(&self.pool, id, max).await
    }

    async fn release_attempt(&self, id: &str) -> Result<(), AuthError> {
        queries::release_reset_attempt(&self.pool, id).await
    }

    async fn consume(&self, id: &str, now: DateTime<Utc>) -> Result<bool, AuthError> {
        queries::consume_reset(&self.pool, id, now).await
    }
}
