//! Request guards.

pub mod auth;
pub mod csrf;
pub mod throttle;
