//! Outbound notifications (e-mail / SMS) used by the reset flows.
//!
//! Delivery transports live outside this crate. Flows send fire-and-forget:
//! a failed delivery is logged and never changes the flow's result.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::auth::AuthError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Channel {
    Email { to: String, subject: String },
    Sms { to: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub channel: Channel,
    pub body: String,
}

/// Language for user-facing notification text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Locale {
    #[default]
    Pt,
    En,
}

impl Locale {
    /// `"en"` selects English; anything else falls back to Portuguese.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("en") || v.to_ascii_lowercase().starts_with("en-") => {
                Locale::En
            }
            _ => Locale::Pt,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<(), AuthError>;
}

/// Send, logging instead of propagating failures.
pub async fn send_quietly(notifier: &dyn Notifier, notification: Notification) {
    let kind = match &notification.channel {
        Channel::Email { .. } => "email",
        Channel::Sms { .. } => "sms",
    };
    if let Err(e) = notifier.send(notification).await {
        warn!(channel = kind, error = %e, "notification delivery failed");
    }
}

/// Notifier that only logs. Used when no transport is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: Notification) -> Result<(), AuthError> {
        match &notification.channel {
            Channel::Email { to, subject } => {
                info!(%to, %subject, "email delivery skipped (no transport configured)");
            }
            Channel::Sms { to } => {
                info!(%to, "sms delivery skipped (no transport configured)");
            }
        }
        debug!(body = %notification.body, "suppressed notification body");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locale_parsing() {
        assert_eq!(Locale::parse(None), Locale::Pt);
        assert_eq!(Locale::parse(Some("pt")), Locale::Pt);
        assert_eq!(Locale::parse(Some("EN")), Locale::En);
        assert_eq!(Locale::parse(Some("en-US")), Locale::En);
        assert_eq!(Locale::parse(Some("fr")), Locale::Pt);
    }

    #[tokio::test]
    async fn log_notifier_accepts_everything() {
        let n = Notification {
            channel: Channel::Sms {
                to: "+5511987654321".into(),
            },
            body: "Seu código de verificação é 123456".into(),
        };
        assert!(LogNotifier.send(n).await.is_ok());
    }
}
