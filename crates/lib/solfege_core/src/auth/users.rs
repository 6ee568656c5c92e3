//! User lookup and credential updates consumed by the auth flows.
//!
//! The roster schema itself belongs to the rest of the application; this is
//! the narrow slice of it the auth core depends on.

use async_trait::async_trait;

use super::AuthError;
use crate::models::auth::{NewUser, User, UserWithPassword};

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserWithPassword>, AuthError>;

    /// Most recently created account with this phone number.
    async fn find_by_phone(&self, phone: &str) -> Result<Option<User>, AuthError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, AuthError>;

    /// Create an account. Fails with [`AuthError::Conflict`] on a taken email.
    async fn create_user(&self, new_user: NewUser) -> Result<User, AuthError>;

    async fn update_password_hash(&self, user_id: &str, hash: &str) -> Result<(), AuthError>;
}
