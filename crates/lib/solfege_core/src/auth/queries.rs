//! Auth-related database queries.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::AuthError;
use crate::models::auth::{
    ImpersonationSession, PasswordResetRecord, ResetKind, SessionFilter, User, UserWithPassword,
};

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

type UserRow = (String, String, String, Option<String>, String, String);

fn user_from_row((id, name, email, phone, role, password_hash): UserRow) -> UserWithPassword {
    UserWithPassword {
        user: User {
            id,
            name,
            email,
            phone,
            role,
        },
        password_hash,
    }
}

/// Fetch a user (with password hash) by email, case-insensitively.
pub async fn find_user_by_email(
    pool: &PgPool,
    email: &str,
) -> Result<Option<UserWithPassword>, AuthError> {
    let row = sqlx::query_as::<_, UserRow>(
        "SELECT id::text, name, email, phone, role, password_hash \
         FROM users WHERE lower(email) = lower($1)",
    )
    .bind(email)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(user_from_row))
}

/// Fetch the newest user with this phone number.
pub async fn find_user_by_phone(pool: &PgPool, phone: &str) -> Result<Option<User>, AuthError> {
    let row = sqlx::query_as::<_, UserRow>(
        "SELECT id::text, name, email, phone, role, password_hash \
         FROM users WHERE phone = $1 \
         ORDER BY created_at DESC LIMIT 1",
    )
    .bind(phone)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| user_from_row(r).user))
}

/// Fetch a user by ID.
pub async fn get_user_by_id(pool: &PgPool, user_id: &str) -> Result<Option<User>, AuthError> {
    let row = sqlx::query_as::<_, UserRow>(
        "SELECT id::text, name, email, phone, role, password_hash \
         FROM users WHERE id = $1::uuid",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| user_from_row(r).user))
}

/// Check whether an email is already registered.
pub async fn email_exists(pool: &PgPool, email: &str) -> Result<bool, AuthError> {
    let exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM users WHERE lower(email) = lower($1))",
    )
    .bind(email)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

/// Create a new user, returning the user ID.
pub async fn create_user(
    pool: &PgPool,
    name: &str,
    email: &str,
    password_hash: &str,
    role: &str,
) -> Result<String, AuthError> {
    let user_id = sqlx::query_scalar::<_, String>(
        "INSERT INTO users (name, email, password_hash, role) \
         VALUES ($1, $2, $3, $4) RETURNING id::text",
    )
    .bind(name)
    .bind(email)
    .bind(password_hash)
    .bind(role)
    .fetch_one(pool)
    .await?;
    Ok(user_id)
}

/// Replace a user's password hash.
pub async fn update_password_hash(
    pool: &PgPool,
    user_id: &str,
    password_hash: &str,
) -> Result<bool, AuthError> {
    let result = sqlx::query(
        "UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1::uuid",
    )
    .bind(user_id)
    .bind(password_hash)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

// ---------------------------------------------------------------------------
// Impersonation sessions
// ---------------------------------------------------------------------------

type SessionRow = (String, String, String, String, DateTime<Utc>, DateTime<Utc>, bool);

fn session_from_row(
    (jti, admin_id, target_user_id, target_role, issued_at, expires_at, revoked): SessionRow,
) -> ImpersonationSession {
    ImpersonationSession {
        jti,
        admin_id,
        target_user_id,
        target_role,
        issued_at,
        expires_at,
        revoked,
    }
}

/// Store an impersonation session record.
pub async fn insert_session(pool: &PgPool, s: &ImpersonationSession) -> Result<(), AuthError> {
    sqlx::query(
        "INSERT INTO impersonation_sessions \
         (jti, admin_id, user_id, role, issued_at, expires_at, revoked) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(&s.jti)
    .bind(&s.admin_id)
    .bind(&s.target_user_id)
    .bind(&s.target_role)
    .bind(s.issued_at)
    .bind(s.expires_at)
    .bind(s.revoked)
    .execute(pool)
    .await?;
    Ok(())
}

/// Fetch one impersonation session by `jti`.
pub async fn find_session(
    pool: &PgPool,
    jti: &str,
) -> Result<Option<ImpersonationSession>, AuthError> {
    let row = sqlx::query_as::<_, SessionRow>(
        "SELECT jti, admin_id, user_id, role, issued_at, expires_at, revoked \
         FROM impersonation_sessions WHERE jti = $1",
    )
    .bind(jti)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(session_from_row))
}

/// Revoke one session. Returns whether a row matched.
pub async fn revoke_session(pool: &PgPool, jti: &str) -> Result<bool, AuthError> {
    let result = sqlx::query("UPDATE impersonation_sessions SET revoked = true WHERE jti = $1")
        .bind(jti)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Revoke every live session matching the filter. `NULL` filter fields match all.
pub async fn revoke_sessions_matching(
    pool: &PgPool,
    filter: &SessionFilter,
) -> Result<u64, AuthError> {
    let result = sqlx::query(
        "UPDATE impersonation_sessions SET revoked = true \
         WHERE revoked = false \
           AND ($1::text IS NULL OR admin_id = $1) \
           AND ($2::text IS NULL OR user_id = $2)",
    )
    .bind(filter.admin_id.as_deref())
    .bind(filter.user_id.as_deref())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// List sessions matching the filter, newest first.
pub async fn list_sessions(
    pool: &PgPool,
    filter: &SessionFilter,
    limit: i64,
) -> Result<Vec<ImpersonationSession>, AuthError> {
    let rows = sqlx::query_as::<_, SessionRow>(
        "SELECT jti, admin_id, user_id, role, issued_at, expires_at, revoked \
         FROM impersonation_sessions \
         WHERE ($1::text IS NULL OR admin_id = $1) \
           AND ($2::text IS NULL OR user_id = $2) \
         ORDER BY issued_at DESC \
         LIMIT $3",
    )
    .bind(filter.admin_id.as_deref())
    .bind(filter.user_id.as_deref())
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(session_from_row).collect())
}

// ---------------------------------------------------------------------------
// Password resets
// ---------------------------------------------------------------------------

type ResetRow = (
    String,
    String,
    String,
    String,
    DateTime<Utc>,
    DateTime<Utc>,
    bool,
    i32,
);

const RESET_COLUMNS: &str =
    "id::text, user_id::text, kind, secret, created_at, expires_at, used, attempts";

fn reset_from_row(
    (id, user_id, kind, secret, created_at, expires_at, used, attempts): ResetRow,
) -> Result<PasswordResetRecord, AuthError> {
    let kind = ResetKind::parse(&kind)
        .ok_or_else(|| AuthError::Internal(format!("unknown reset kind '{kind}'")))?;
    Ok(PasswordResetRecord {
        id,
        user_id,
        kind,
        secret,
        created_at,
        expires_at,
        used,
        attempts,
    })
}

/// Store a password reset record.
pub async fn insert_reset(pool: &PgPool, r: &PasswordResetRecord) -> Result<(), AuthError> {
    sqlx::query(
        "INSERT INTO password_resets \
         (id, user_id, kind, secret, created_at, expires_at, used, attempts) \
         VALUES ($1::uuid, $2::uuid, $3, $4, $5, $6, $7, $8)",
    )
    .bind(&r.id)
    .bind(&r.user_id)
    .bind(r.kind.as_str())
    .bind(&r.secret)
    .bind(r.created_at)
    .bind(r.expires_at)
    .bind(r.used)
    .bind(r.attempts)
    .execute(pool)
    .await?;
    Ok(())
}

/// Fetch a reset record by ID.
pub async fn find_reset_by_id(
    pool: &PgPool,
    id: &str,
) -> Result<Option<PasswordResetRecord>, AuthError> {
    let row = sqlx::query_as::<_, ResetRow>(&format!(
        "SELECT {RESET_COLUMNS} FROM password_resets WHERE id = $1::uuid"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.map(reset_from_row).transpose()
}

/// Fetch the newest link record with this token digest.
pub async fn find_reset_by_token_hash(
    pool: &PgPool,
    token_hash: &str,
) -> Result<Option<PasswordResetRecord>, AuthError> {
    let row = sqlx::query_as::<_, ResetRow>(&format!(
        "SELECT {RESET_COLUMNS} FROM password_resets \
         WHERE kind = 'link' AND secret = $1 \
         ORDER BY created_at DESC LIMIT 1"
    ))
    .bind(token_hash)
    .fetch_optional(pool)
    .await?;
    row.map(reset_from_row).transpose()
}

/// Fetch the newest unused code record for a user.
pub async fn latest_unused_code(
    pool: &PgPool,
    user_id: &str,
) -> Result<Option<PasswordResetRecord>, AuthError> {
    let row = sqlx::query_as::<_, ResetRow>(&format!(
        "SELECT {RESET_COLUMNS} FROM password_resets \
         WHERE kind = 'code' AND user_id = $1::uuid AND used = false \
         ORDER BY created_at DESC LIMIT 1"
    ))
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    row.map(reset_from_row).transpose()
}

/// Take one attempt slot while fewer than `max` are taken and the record is
/// unused. `None` when nothing was claimed.
pub async fn claim_reset_attempt(
    pool: &PgPool,
    id: &str,
    max: i32,
) -> Result<Option<i32>, AuthError> {
    let attempts = sqlx::query_scalar::<_, i32>(
        "UPDATE password_resets SET attempts = attempts + 1 \
         WHERE id = $1::uuid AND attempts < $2 AND used = false \
         RETURNING attempts",
    )
    .bind(id)
    .bind(max)
    .fetch_optional(pool)
    .await?;
    Ok(attempts)
}

/// Hand back a slot claimed for a correct code.
pub async fn release_reset_attempt(pool: &PgPool, id: &str) -> Result<(), AuthError> {
    sqlx::query(
        "UPDATE password_resets SET attempts = GREATEST(attempts - 1, 0) \
         WHERE id = $1::uuid",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Mark a record used if it is still unused and unexpired at `now`.
pub async fn consume_reset(pool: &PgPool, id: &str, now: DateTime<Utc>) -> Result<bool, AuthError> {
    let result = sqlx::query(
        "UPDATE password_resets SET used = true \
         WHERE id = $1::uuid AND used = false AND expires_at > $2",
    )
    .bind(id)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}
