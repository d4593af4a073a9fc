//! Sending user profile and the collaborator traits the send pipeline needs.

use crate::error::OutreachResult;
use crate::types::{SendMethod, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The parts of a user account that gate sending.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderProfile {
    pub user_id: UserId,
    pub email: String,
    pub email_confirmed: bool,
    /// Additional addresses the user has verified for relay sending.
    pub verified_emails: Vec<String>,
    pub is_active: bool,
    pub is_banned: bool,

    pub smtp_valid: bool,
    pub external_email: bool,
    pub email_setting_id: Option<i64>,
    pub gmail_connected: bool,
    pub outlook_connected: bool,
    pub use_sparkpost: bool,
}

impl SenderProfile {
    pub fn new(user_id: UserId, email: impl Into<String>) -> Self {
        Self {
            user_id,
            email: email.into(),
            email_confirmed: true,
            is_active: true,
            ..Default::default()
        }
    }

    pub fn can_send(&self) -> bool {
        self.is_active && !self.is_banned
    }

    /// Channel for a new send, by account preference: SMTP, Gmail, Outlook,
    /// SparkPost, then the SendGrid default.
    pub fn resolve_send_method(&self) -> SendMethod {
        if self.smtp_valid && self.external_email && self.email_setting_id.is_some() {
            SendMethod::Smtp
        } else if self.gmail_connected {
            SendMethod::Gmail
        } else if self.outlook_connected {
            SendMethod::Outlook
        } else if self.use_sparkpost {
            SendMethod::SparkPost
        } else {
            SendMethod::SendGrid
        }
    }

    /// An empty address means "use the account address".
    pub fn owns_address(&self, address: &str) -> bool {
        address.is_empty()
            || address.eq_ignore_ascii_case(&self.email)
            || self
                .verified_emails
                .iter()
                .any(|e| e.eq_ignore_ascii_case(address))
    }
}

/// Lookup of sending users.
#[async_trait]
pub trait SenderDirectory: Send + Sync {
    async fn sender(&self, user_id: UserId) -> OutreachResult<Option<SenderProfile>>;
}

/// Body validation applied before a send is committed.
pub trait HtmlSanitizer: Send + Sync {
    /// `Err` carries a human-readable reason the body was rejected.
    fn validate(&self, html: &str) -> Result<(), String>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_method_preference_order() {
        let mut sender = SenderProfile::new(1, "me@agency.com");
        assert_eq!(sender.resolve_send_method(), SendMethod::SendGrid);

        sender.use_sparkpost = true;
        assert_eq!(sender.resolve_send_method(), SendMethod::SparkPost);

        sender.outlook_connected = true;
        assert_eq!(sender.resolve_send_method(), SendMethod::Outlook);

        sender.gmail_connected = true;
        assert_eq!(sender.resolve_send_method(), SendMethod::Gmail);

        sender.smtp_valid = true;
        sender.external_email = true;
        assert_eq!(sender.resolve_send_method(), SendMethod::Gmail);
        sender.email_setting_id = Some(4);
        assert_eq!(sender.resolve_send_method(), SendMethod::Smtp);
    }

    #[test]
    fn test_owns_address() {
        let mut sender = SenderProfile::new(1, "me@agency.com");
        sender.verified_emails = vec!["press@agency.com".into()];
        assert!(sender.owns_address(""));
        assert!(sender.owns_address("ME@agency.com"));
        assert!(sender.owns_address("press@agency.com"));
        assert!(!sender.owns_address("ceo@elsewhere.com"));
    }

    #[test]
    fn test_suspended_senders() {
        let mut sender = SenderProfile::new(1, "me@agency.com");
        assert!(sender.can_send());
        sender.is_banned = true;
        assert!(!sender.can_send());
        sender.is_banned = false;
        sender.is_active = false;
        assert!(!sender.can_send());
    }
}
