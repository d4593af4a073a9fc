//! Email change notifications: trait for publishing batches of affected ids.
//!
//! Components accept an `Arc<dyn Notifier>` and publish after every
//! committed write. Downstream consumers (the search-index sync worker) pull
//! the records by id, so a notification carries ids only.

use crate::error::OutreachResult;
use crate::types::EmailId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Logical topics for email batch notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailTopic {
    /// Emails that were just committed as sent.
    Send,
    /// Emails whose lifecycle state changed (cancel, archive, tracking).
    Changed,
}

impl EmailTopic {
    /// NATS subject for this topic under `prefix`.
    pub fn subject(&self, prefix: &str) -> String {
        match self {
            EmailTopic::Send => format!("{prefix}.emails.send"),
            EmailTopic::Changed => format!("{prefix}.emails.changed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailBatchNotification {
    pub email_ids: Vec<EmailId>,
    pub emitted_at: DateTime<Utc>,
}

impl EmailBatchNotification {
    pub fn new(email_ids: Vec<EmailId>) -> Self {
        Self {
            email_ids,
            emitted_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(
        &self,
        topic: EmailTopic,
        notification: &EmailBatchNotification,
    ) -> OutreachResult<()>;
}

/// Publish `ids` on `topic` unless the batch is empty.
pub async fn notify_ids(
    notifier: &dyn Notifier,
    topic: EmailTopic,
    ids: Vec<EmailId>,
) -> OutreachResult<()> {
    if ids.is_empty() {
        return Ok(());
    }
    notifier
        .publish(topic, &EmailBatchNotification::new(ids))
        .await
}

/// Drops every notification. Used when no broker is configured.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn publish(
        &self,
        _topic: EmailTopic,
        _notification: &EmailBatchNotification,
    ) -> OutreachResult<()> {
        Ok(())
    }
}

/// In-memory notifier that captures publications for testing.
#[derive(Default)]
pub struct CaptureNotifier {
    published: Mutex<Vec<(EmailTopic, EmailBatchNotification)>>,
}

impl CaptureNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<(EmailTopic, EmailBatchNotification)> {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn count(&self) -> usize {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Every id published on `topic`, in publication order.
    pub fn ids_for(&self, topic: EmailTopic) -> Vec<EmailId> {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(t, _)| *t == topic)
            .flat_map(|(_, n)| n.email_ids.iter().copied())
            .collect()
    }
}

#[async_trait]
impl Notifier for CaptureNotifier {
    async fn publish(
        &self,
        topic: EmailTopic,
        notification: &EmailBatchNotification,
    ) -> OutreachResult<()> {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((topic, notification.clone()));
        Ok(())
    }
}

/// Convenience: a notifier that drops everything.
pub fn noop_notifier() -> Arc<dyn Notifier> {
    Arc::new(NoopNotifier)
}

/// Convenience: a capture notifier for tests.
pub fn capture_notifier() -> Arc<CaptureNotifier> {
    Arc::new(CaptureNotifier::new())
}
