//! # solfege_core
//!
//! Core authentication and session logic for Solfege: signed access tokens,
//! the impersonation session registry, CSRF and rate-limit guards, and the
//! password reset flows.

pub mod audit;
pub mod auth;
pub mod memory;
pub mod migrate;
pub mod models;
pub mod notify;
pub mod uuid;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_empty() {
        assert!(!version().is_empty());
    }
}
