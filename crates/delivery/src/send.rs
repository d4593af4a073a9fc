//! Send pipeline: validate, attach tracking, mark sent, commit in chunks.
//!
//! Committing `is_sent` is the handoff. Released sends are picked up by the
//! dispatcher through the `Send` notification; scheduled ones wait for the
//! release sweep.

use crate::batch::{commit_in_chunks, BatchCommitReport, ChunkFailure, ChunkPolicy};
use crate::error::{DeliveryError, DeliveryResult};
use crate::sanitizer::BasicHtmlSanitizer;
use crate::tracking::TrackingRewriter;
use chrono::Utc;
use outreach_core::cache::{invalidate_keys, CampaignCache};
use outreach_core::campaign_key::derive_key;
use outreach_core::config::DeliveryConfig;
use outreach_core::event_bus::{notify_ids, EmailTopic, Notifier};
use outreach_core::sender::{HtmlSanitizer, SenderProfile};
use outreach_core::store::RecordStore;
use outreach_core::types::{EmailId, EmailRecord, NO_SUBJECT};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

/// A record left out of a bulk operation, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SkippedEmail {
    pub id: EmailId,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct BulkSendOutcome {
    /// Committed records, in request order.
    pub sent: Vec<EmailRecord>,
    pub skipped: Vec<SkippedEmail>,
    pub failed_chunks: Vec<ChunkFailure>,
    pub has_errors: bool,
}

impl BulkSendOutcome {
    pub fn sent_ids(&self) -> Vec<EmailId> {
        self.sent.iter().map(|r| r.id).collect()
    }
}

pub struct SendPipeline {
    store: Arc<dyn RecordStore>,
    notifier: Arc<dyn Notifier>,
    cache: Arc<dyn CampaignCache>,
    sanitizer: Arc<dyn HtmlSanitizer>,
    tracking: TrackingRewriter,
    policy: ChunkPolicy,
}

impl SendPipeline {
    pub fn new(
        store: Arc<dyn RecordStore>,
        notifier: Arc<dyn Notifier>,
        cache: Arc<dyn CampaignCache>,
        config: &DeliveryConfig,
    ) -> Self {
        info!(
            chunk_size = config.chunk_size,
            chunk_timeout_secs = config.chunk_timeout_secs,
            "Send pipeline initialized"
        );
        Self {
            store,
            notifier,
            cache,
            sanitizer: Arc::new(BasicHtmlSanitizer),
            tracking: TrackingRewriter::new(&config.click_redirect_url, &config.pixel_url),
            policy: ChunkPolicy::new(
                config.chunk_size,
                Duration::from_secs(config.chunk_timeout_secs),
            ),
        }
    }

    pub fn with_sanitizer(mut self, sanitizer: Arc<dyn HtmlSanitizer>) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    /// Validate `email` and return it ready to commit. Does not persist.
    pub fn prepare_send(
        &self,
        sender: &SenderProfile,
        mut email: EmailRecord,
    ) -> DeliveryResult<EmailRecord> {
        if email.is_sent {
            return Err(DeliveryError::AlreadySent(email.id));
        }

        let method = email
            .method
            .unwrap_or_else(|| sender.resolve_send_method());

        if method.requires_confirmed_sender() {
            if !sender.email_confirmed {
                return Err(DeliveryError::NotConfirmed(sender.email.clone()));
            }
            if !sender.owns_address(&email.from_email) {
                return Err(DeliveryError::NotConfirmed(email.from_email.clone()));
            }
        }

        self.sanitizer
            .validate(&email.body)
            .map_err(|reason| DeliveryError::InvalidContent {
                id: email.id,
                reason,
            })?;

        email.method = Some(method);
        if email.subject.trim().is_empty() {
            email.subject = NO_SUBJECT.to_string();
        }
        email.body = self.tracking.apply(&email.body, email.id);
        email.is_sent = true;
        email.updated = Utc::now();
        Ok(email)
    }

    pub async fn bulk_send(
        &self,
        sender: &SenderProfile,
        ids: &[EmailId],
    ) -> DeliveryResult<BulkSendOutcome> {
        if !sender.can_send() {
            warn!(user_id = sender.user_id, "Suspended user attempted a bulk send");
            return Err(DeliveryError::SenderSuspended(sender.user_id));
        }

        let mut seen = HashSet::new();
        let unique: Vec<EmailId> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();
        let loaded = self.store.get_multi(&unique).await?;

        let mut skipped = Vec::new();
        let mut prepared = Vec::with_capacity(loaded.len());
        for email in loaded {
            let id = email.id;
            if email.created_by != sender.user_id {
                skipped.push(SkippedEmail {
                    id,
                    reason: DeliveryError::Forbidden(id).to_string(),
                });
                continue;
            }
            match self.prepare_send(sender, email) {
                Ok(ready) => prepared.push(ready),
                Err(e) => {
                    debug!(email_id = id, error = %e, "Skipping email in bulk send");
                    skipped.push(SkippedEmail {
                        id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let report = commit_in_chunks(&self.store, prepared.clone(), self.policy).await;
        let outcome = self.finish(prepared, skipped, report).await?;

        metrics::counter!("outreach_bulk_send_committed_total").increment(outcome.sent.len() as u64);
        metrics::counter!("outreach_bulk_send_skipped_total").increment(outcome.skipped.len() as u64);
        info!(
            user_id = sender.user_id,
            requested = ids.len(),
            sent = outcome.sent.len(),
            skipped = outcome.skipped.len(),
            failed_chunks = outcome.failed_chunks.len(),
            "Bulk send complete"
        );
        Ok(outcome)
    }

    /// Post-commit work: cache invalidation for live sends and the single
    /// `Send` notification carrying every committed id.
    async fn finish(
        &self,
        prepared: Vec<EmailRecord>,
        skipped: Vec<SkippedEmail>,
        report: BatchCommitReport,
    ) -> DeliveryResult<BulkSendOutcome> {
        let committed: HashSet<EmailId> = report.committed.iter().copied().collect();
        let sent: Vec<EmailRecord> = prepared
            .into_iter()
            .filter(|r| committed.contains(&r.id))
            .collect();

        let now = Utc::now();
        let live_keys = sent
            .iter()
            .filter(|r| r.is_released(now))
            .map(derive_key);
        invalidate_keys(self.cache.as_ref(), live_keys).await;

        notify_ids(self.notifier.as_ref(), EmailTopic::Send, report.committed.clone()).await?;

        let has_errors = !skipped.is_empty() || report.has_failures();
        Ok(BulkSendOutcome {
            sent,
            skipped,
            failed_chunks: report.failures,
            has_errors,
        })
    }

    /// Send one email; surfaces the first concrete error.
    pub async fn send_single(
        &self,
        sender: &SenderProfile,
        id: EmailId,
    ) -> DeliveryResult<EmailRecord> {
        if !sender.can_send() {
            warn!(user_id = sender.user_id, "Suspended user attempted a send");
            return Err(DeliveryError::SenderSuspended(sender.user_id));
        }
        let email = self
            .store
            .get(id)
            .await?
            .ok_or(DeliveryError::NotFound(id))?;
        if email.created_by != sender.user_id {
            return Err(DeliveryError::Forbidden(id));
        }

        let prepared = self.prepare_send(sender, email)?;
        let report = commit_in_chunks(&self.store, vec![prepared.clone()], self.policy).await;
        if let Some(failure) = report.failures.first() {
            return Err(DeliveryError::Infrastructure(
                outreach_core::error::OutreachError::Store(failure.error.clone()),
            ));
        }

        let mut outcome = self.finish(vec![prepared], Vec::new(), report).await?;
        metrics::counter!("outreach_single_send_total").increment(1);
        outcome
            .sent
            .pop()
            .ok_or(DeliveryError::NotFound(id))
    }
}
