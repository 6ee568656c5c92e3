//! Business operations behind the handlers.

pub mod auth;
pub mod cookies;
pub mod impersonation;
