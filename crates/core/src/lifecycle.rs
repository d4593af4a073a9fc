//! Lifecycle transitions applied to an [`EmailRecord`] after it was sent.
//!
//! Terminal flags (`bounced`, `spam`, `dropped`, `delivered`) are idempotent,
//! counters are additive, so transitions commute across batches. Every
//! transition that confirms delivery clears a pending cancellation: once a
//! provider has the message, delivery wins the race.

use crate::types::{EmailId, EmailRecord};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("email {0} has not been sent")]
    NotSent(EmailId),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CancelRejection {
    #[error("email {0} has already been delivered")]
    AlreadyDelivered(EmailId),
    #[error("email {0} is not scheduled for a future send")]
    NotScheduled(EmailId),
}

impl EmailRecord {
    fn ensure_sent(&self) -> Result<(), TransitionError> {
        if self.is_sent {
            Ok(())
        } else {
            Err(TransitionError::NotSent(self.id))
        }
    }

    fn confirm_delivery(&mut self) {
        if self.cancel {
            warn!(email_id = self.id, "delivery confirmed after cancellation; delivery wins");
            self.cancel = false;
        }
        self.delivered = true;
    }

    /// Pixel hits. Ignored while the send is still scheduled.
    pub fn mark_opened(&mut self, count: u32, now: DateTime<Utc>) -> Result<bool, TransitionError> {
        self.ensure_sent()?;
        if count == 0 || !self.is_released(now) {
            return Ok(false);
        }
        self.opened = self.opened.saturating_add(count);
        self.confirm_delivery();
        Ok(true)
    }

    /// Redirector hits. Ignored while the send is still scheduled.
    pub fn mark_clicked(&mut self, count: u32, now: DateTime<Utc>) -> Result<bool, TransitionError> {
        self.ensure_sent()?;
        if count == 0 || !self.is_released(now) {
            return Ok(false);
        }
        self.clicked = self.clicked.saturating_add(count);
        self.confirm_delivery();
        Ok(true)
    }

    pub fn mark_bounced(&mut self, reason: Option<String>) -> Result<bool, TransitionError> {
        self.ensure_sent()?;
        let reason = reason.filter(|r| !r.is_empty());
        let changed = !self.bounced || !self.delivered || self.cancel || self.bounced_reason != reason;
        self.bounced = true;
        self.bounced_reason = reason;
        self.confirm_delivery();
        Ok(changed)
    }

    pub fn mark_delivered(&mut self) -> Result<bool, TransitionError> {
        self.ensure_sent()?;
        let changed = !self.delivered || self.cancel;
        self.confirm_delivery();
        Ok(changed)
    }

    pub fn mark_spam(&mut self) -> Result<bool, TransitionError> {
        self.ensure_sent()?;
        let changed = !self.spam || !self.delivered || self.cancel;
        self.spam = true;
        self.confirm_delivery();
        Ok(changed)
    }

    pub fn mark_dropped(&mut self) -> Result<bool, TransitionError> {
        self.ensure_sent()?;
        let changed = !self.dropped || !self.delivered || self.cancel;
        self.dropped = true;
        self.confirm_delivery();
        Ok(changed)
    }

    /// Provider-native open counter, kept apart from the pixel counter.
    pub fn mark_provider_opened(&mut self) -> Result<bool, TransitionError> {
        self.ensure_sent()?;
        self.sendgrid_opened = self.sendgrid_opened.saturating_add(1);
        self.confirm_delivery();
        Ok(true)
    }

    pub fn mark_provider_clicked(&mut self) -> Result<bool, TransitionError> {
        self.ensure_sent()?;
        self.sendgrid_clicked = self.sendgrid_clicked.saturating_add(1);
        self.confirm_delivery();
        Ok(true)
    }

    /// Cancel a future send. Only valid while undelivered and still scheduled.
    pub fn cancel_schedule(&mut self, now: DateTime<Utc>) -> Result<bool, CancelRejection> {
        if self.delivered {
            return Err(CancelRejection::AlreadyDelivered(self.id));
        }
        if !self.is_sent || !self.is_scheduled(now) {
            return Err(CancelRejection::NotScheduled(self.id));
        }
        if self.cancel {
            return Ok(false);
        }
        self.cancel = true;
        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sent_email() -> EmailRecord {
        let mut email = EmailRecord::draft(7, "reporter@news.com", "Launch");
        email.id = 42;
        email.is_sent = true;
        email
    }

    #[test]
    fn test_terminal_events_are_idempotent() {
        let mut once = sent_email();
        once.mark_bounced(Some("mailbox full".into())).unwrap();
        once.mark_spam().unwrap();
        once.mark_dropped().unwrap();
        once.mark_delivered().unwrap();

        let mut twice = once.clone();
        assert!(!twice.mark_bounced(Some("mailbox full".into())).unwrap());
        assert!(!twice.mark_spam().unwrap());
        assert!(!twice.mark_dropped().unwrap());
        assert!(!twice.mark_delivered().unwrap());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_counters_are_monotonic() {
        let now = Utc::now();
        let mut email = sent_email();
        let mut last = (0, 0);
        for count in [1, 0, 3, 2] {
            email.mark_opened(count, now).unwrap();
            email.mark_clicked(count, now).unwrap();
            email.mark_bounced(None).unwrap();
            assert!(email.opened >= last.0);
            assert!(email.clicked >= last.1);
            last = (email.opened, email.clicked);
        }
        assert_eq!(email.opened, 6);
        assert_eq!(email.clicked, 6);
    }

    #[test]
    fn test_engagement_gated_by_schedule() {
        let now = Utc::now();
        let mut email = sent_email();
        email.send_at = Some(now + Duration::hours(1));
        assert!(!email.mark_opened(1, now).unwrap());
        assert!(!email.mark_clicked(2, now).unwrap());
        assert_eq!(email.opened, 0);
        assert!(!email.delivered);
    }

    #[test]
    fn test_events_on_unsent_email_rejected() {
        let mut draft = EmailRecord::draft(1, "a@x.com", "s");
        draft.id = 5;
        assert_eq!(draft.mark_delivered(), Err(TransitionError::NotSent(5)));
        assert_eq!(draft.mark_opened(1, Utc::now()), Err(TransitionError::NotSent(5)));
        assert!(!draft.delivered);
        assert_eq!(draft.opened, 0);
    }

    #[test]
    fn test_delivered_implies_sent_and_not_cancelled() {
        let now = Utc::now();
        let mut email = sent_email();
        email.send_at = Some(now + Duration::hours(1));
        assert!(email.cancel_schedule(now).unwrap());
        assert!(email.cancel);

        // Provider confirmation arrives after the cancel: delivery wins.
        email.mark_delivered().unwrap();
        assert!(email.delivered);
        assert!(email.is_sent);
        assert!(!email.cancel);
        assert_eq!(
            email.cancel_schedule(now),
            Err(CancelRejection::AlreadyDelivered(42))
        );
    }

    #[test]
    fn test_cancel_requires_future_schedule() {
        let now = Utc::now();
        let mut email = sent_email();
        assert_eq!(email.cancel_schedule(now), Err(CancelRejection::NotScheduled(42)));

        email.send_at = Some(now + Duration::minutes(5));
        assert!(email.cancel_schedule(now).unwrap());
        assert!(!email.cancel_schedule(now).unwrap());
    }

    #[test]
    fn test_provider_counters_separate() {
        let mut email = sent_email();
        email.mark_provider_opened().unwrap();
        email.mark_provider_clicked().unwrap();
        assert_eq!(email.sendgrid_opened, 1);
        assert_eq!(email.sendgrid_clicked, 1);
        assert_eq!(email.opened, 0);
        assert_eq!(email.clicked, 0);
        assert!(email.delivered);
    }
}
