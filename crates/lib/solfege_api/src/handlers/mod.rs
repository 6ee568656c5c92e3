//! Request handlers.

pub mod auth;
pub mod impersonation;
pub mod password;
pub mod privacy;
