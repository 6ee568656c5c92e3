//! Password hashing via bcrypt, plus credential input predicates.

use std::sync::LazyLock;

use regex::Regex;

use super::AuthError;

/// bcrypt cost factor.
const BCRYPT_COST: u32 = 10;

/// Minimum accepted password length.
pub const MIN_PASSWORD_LEN: usize = 8;

static EMAIL_RE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$"));

static PHONE_RE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^\+?[0-9]{10,15}$"));

/// Hash a password with bcrypt (cost 10).
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    bcrypt::hash(password, BCRYPT_COST)
        .map_err(|e| AuthError::Internal(format!("bcrypt hash: {e}")))
}

/// Verify a password against a bcrypt hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    bcrypt::verify(password, hash).map_err(|e| AuthError::Internal(format!("bcrypt verify: {e}")))
}

/// Hash checked when no account matched, so a miss costs one bcrypt round too.
static DUMMY_HASH: LazyLock<Option<String>> =
    LazyLock::new(|| hash_password("solfege-dummy-credential").ok());

/// Spend one bcrypt verification on a credential that has no account.
///
/// Always false.
pub fn verify_password_for_missing_account(password: &str) -> bool {
    if let Some(hash) = DUMMY_HASH.as_ref() {
        let _ = bcrypt::verify(password, hash);
    }
    false
}

/// Length, upper, lower, digit and symbol requirements.
pub fn validate_password_complexity(password: &str) -> bool {
    password.chars().count() >= MIN_PASSWORD_LEN
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(|c| !c.is_ascii_alphanumeric())
}

/// Reject weak passwords before any record is touched.
pub fn ensure_password_complexity(password: &str) -> Result<(), AuthError> {
    if validate_password_complexity(password) {
        Ok(())
    } else {
        Err(AuthError::ValidationFailed(
            "Password must have at least 8 characters, upper and lower case letters, a digit and a symbol".into(),
        ))
    }
}

pub fn validate_email(email: &str) -> bool {
    EMAIL_RE.as_ref().is_ok_and(|re| re.is_match(email))
}

pub fn is_phone(value: &str) -> bool {
    PHONE_RE.as_ref().is_ok_and(|re| re.is_match(value))
}

/// Strip markup characters from a display name.
pub fn sanitize_name(name: &str) -> String {
    name.replace(['<', '>', '/'], "").trim().to_string()
}
