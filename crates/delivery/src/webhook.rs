//! Webhook Event Reconciler.
//!
//! Applies a batch of tracker/provider events to email records. Events are
//! resolved either by internal email id (pixel, redirector, unsubscribe
//! links) or by provider message id. Every event is attempted; failures are
//! collected and reported, never used to roll back applied transitions.

use crate::batch::{commit_in_chunks, ChunkFailure, ChunkPolicy};
use chrono::Utc;
use outreach_core::cache::{invalidate_keys, CampaignCache};
use outreach_core::campaign_key::derive_key;
use outreach_core::error::OutreachResult;
use outreach_core::event_bus::{notify_ids, EmailTopic, Notifier};
use outreach_core::lifecycle::TransitionError;
use outreach_core::store::RecordStore;
use outreach_core::types::{ContactUnsubscribe, EmailId, EmailRecord, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

/// Ids arrive as numbers from our own trackers and as strings from
/// provider custom args.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum LooseId {
    Number(i64),
    Text(String),
}

impl LooseId {
    pub fn as_id(&self) -> Option<EmailId> {
        match self {
            LooseId::Number(n) => Some(*n),
            LooseId::Text(s) => s.trim().parse().ok(),
        }
        .filter(|id| *id > 0)
    }
}

fn default_count() -> u32 {
    1
}

/// One flat event from the tracker webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TrackerEvent {
    pub event: String,
    #[serde(default)]
    pub id: Option<LooseId>,
    /// Hits folded into this entry by the tracker.
    #[serde(default = "default_count")]
    pub count: u32,
    #[serde(default, alias = "message_id")]
    pub sg_message_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default, rename = "emailId")]
    pub email_id: Option<LooseId>,
    #[serde(default, rename = "createdBy")]
    pub created_by: Option<UserId>,
}

impl TrackerEvent {
    pub fn internal(event: &str, id: EmailId) -> Self {
        Self {
            event: event.to_string(),
            id: Some(LooseId::Number(id)),
            count: 1,
            sg_message_id: None,
            email: None,
            timestamp: None,
            reason: None,
            email_id: None,
            created_by: None,
        }
    }

    pub fn provider(event: &str, message_id: &str) -> Self {
        Self {
            id: None,
            sg_message_id: Some(message_id.to_string()),
            ..Self::internal(event, 0)
        }
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    pub fn with_email_hint(mut self, id: EmailId) -> Self {
        self.email_id = Some(LooseId::Number(id));
        self
    }
}

/// How an event finds its record.
enum Resolution {
    Internal(EmailId),
    Provider {
        message_id: String,
        hint: Option<EmailId>,
    },
}

fn resolve_scheme(event: &TrackerEvent) -> Option<Resolution> {
    let message_id = event
        .sg_message_id
        .as_deref()
        .map(|m| m.split('.').next().unwrap_or_default().trim())
        .filter(|m| !m.is_empty());
    match message_id {
        Some(message_id) => Some(Resolution::Provider {
            message_id: message_id.to_string(),
            hint: event.email_id.as_ref().and_then(LooseId::as_id),
        }),
        None => event
            .id
            .as_ref()
            .and_then(LooseId::as_id)
            .map(Resolution::Internal),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct EventFailure {
    /// Position of the event in the batch.
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct ReconcileReport {
    /// Events whose transition was applied (including no-op replays).
    pub applied: usize,
    /// Records that changed and were committed.
    pub affected_ids: Vec<EmailId>,
    pub unsubscribes: usize,
    pub failures: Vec<EventFailure>,
    pub failed_chunks: Vec<ChunkFailure>,
    pub has_errors: bool,
}

enum Outcome {
    Changed,
    Unchanged,
    Unsubscribe(ContactUnsubscribe),
}

pub struct WebhookReconciler {
    store: Arc<dyn RecordStore>,
    notifier: Arc<dyn Notifier>,
    cache: Arc<dyn CampaignCache>,
    policy: ChunkPolicy,
}

impl WebhookReconciler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        notifier: Arc<dyn Notifier>,
        cache: Arc<dyn CampaignCache>,
        policy: ChunkPolicy,
    ) -> Self {
        Self {
            store,
            notifier,
            cache,
            policy,
        }
    }

    pub async fn reconcile(&self, events: &[TrackerEvent]) -> OutreachResult<ReconcileReport> {
        let now = Utc::now();
        let schemes: Vec<Option<Resolution>> = events.iter().map(resolve_scheme).collect();

        // One bulk read for internal ids and provider hints.
        let prefetch: Vec<EmailId> = schemes
            .iter()
            .filter_map(|s| match s {
                Some(Resolution::Internal(id)) => Some(*id),
                Some(Resolution::Provider { hint, .. }) => *hint,
                None => None,
            })
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut working: HashMap<EmailId, EmailRecord> = self
            .store
            .get_multi(&prefetch)
            .await?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();
        let mut by_message: HashMap<String, Option<EmailId>> = HashMap::new();

        let mut report = ReconcileReport::default();
        let mut changed: BTreeSet<EmailId> = BTreeSet::new();

        for (index, (event, scheme)) in events.iter().zip(schemes).enumerate() {
            let kind = event.event.trim().to_ascii_lowercase();
            let outcome = match scheme {
                None => Err("event carries neither an id nor a provider message id".to_string()),
                Some(Resolution::Internal(id)) => match working.get_mut(&id) {
                    Some(email) => apply_internal(email, &kind, event, now),
                    None => Err(format!("email {id} not found")),
                },
                Some(Resolution::Provider { message_id, hint }) => {
                    match self
                        .resolve_provider(&message_id, hint, &mut working, &mut by_message)
                        .await?
                    {
                        Some(id) => match working.get_mut(&id) {
                            Some(email) => {
                                let recorded = record_provider_id(email, &message_id);
                                apply_provider(email, &kind, event).map(|o| match o {
                                    Outcome::Unchanged if recorded => Outcome::Changed,
                                    other => other,
                                })
                            }
                            None => Err(format!("email {id} not found")),
                        },
                        None => Err(format!("no email for provider message {message_id}")),
                    }
                }
            };

            match outcome {
                Ok(Outcome::Changed) => {
                    report.applied += 1;
                    if let Some(id) = event_target(&working, &by_message, event) {
                        changed.insert(id);
                    }
                }
                Ok(Outcome::Unchanged) => report.applied += 1,
                Ok(Outcome::Unsubscribe(unsubscribe)) => {
                    match self.store.insert_unsubscribe(unsubscribe).await {
                        Ok(_) => {
                            report.applied += 1;
                            report.unsubscribes += 1;
                        }
                        Err(e) => {
                            warn!(index, error = %e, "Failed to record unsubscribe");
                            report.failures.push(EventFailure {
                                index,
                                reason: e.to_string(),
                            });
                        }
                    }
                }
                Err(reason) => {
                    debug!(index, event = %kind, reason = %reason, "Webhook event not applied");
                    report.failures.push(EventFailure { index, reason });
                }
            }
        }

        let records: Vec<EmailRecord> = changed
            .iter()
            .filter_map(|id| working.remove(id))
            .map(|mut r| {
                r.updated = now;
                r
            })
            .collect();
        let keys: HashMap<EmailId, String> = records.iter().map(|r| (r.id, derive_key(r))).collect();

        let commit = commit_in_chunks(&self.store, records, self.policy).await;
        invalidate_keys(
            self.cache.as_ref(),
            commit.committed.iter().filter_map(|id| keys.get(id).cloned()),
        )
        .await;
        notify_ids(self.notifier.as_ref(), EmailTopic::Changed, commit.committed.clone()).await?;

        report.affected_ids = commit.committed;
        report.failed_chunks = commit.failures;
        report.has_errors = !report.failures.is_empty() || !report.failed_chunks.is_empty();

        metrics::counter!("outreach_webhook_events_total").increment(events.len() as u64);
        metrics::counter!("outreach_webhook_event_failures_total")
            .increment(report.failures.len() as u64);
        if report.has_errors {
            warn!(
                events = events.len(),
                applied = report.applied,
                failed = report.failures.len(),
                "Webhook batch processed with errors"
            );
        } else {
            info!(
                events = events.len(),
                affected = report.affected_ids.len(),
                "Webhook batch processed"
            );
        }
        Ok(report)
    }

    /// Find the record a provider message id belongs to, loading it into the
    /// working set. Falls back to the internal id hint.
    async fn resolve_provider(
        &self,
        message_id: &str,
        hint: Option<EmailId>,
        working: &mut HashMap<EmailId, EmailRecord>,
        by_message: &mut HashMap<String, Option<EmailId>>,
    ) -> OutreachResult<Option<EmailId>> {
        if let Some(resolved) = by_message.get(message_id) {
            return Ok(*resolved);
        }
        let resolved = match self.store.find_by_provider_id(message_id).await? {
            Some(record) => {
                let id = record.id;
                working.entry(id).or_insert(record);
                Some(id)
            }
            None => hint.filter(|id| working.contains_key(id)),
        };
        by_message.insert(message_id.to_string(), resolved);
        Ok(resolved)
    }
}

fn event_target(
    working: &HashMap<EmailId, EmailRecord>,
    by_message: &HashMap<String, Option<EmailId>>,
    event: &TrackerEvent,
) -> Option<EmailId> {
    match resolve_scheme(event)? {
        Resolution::Internal(id) => working.contains_key(&id).then_some(id),
        Resolution::Provider { message_id, .. } => by_message.get(&message_id).copied().flatten(),
    }
}

fn transition(result: Result<bool, TransitionError>) -> Result<Outcome, String> {
    match result {
        Ok(true) => Ok(Outcome::Changed),
        Ok(false) => Ok(Outcome::Unchanged),
        Err(e) => Err(e.to_string()),
    }
}

fn apply_internal(
    email: &mut EmailRecord,
    kind: &str,
    event: &TrackerEvent,
    now: chrono::DateTime<Utc>,
) -> Result<Outcome, String> {
    match kind {
        "open" => transition(email.mark_opened(event.count, now)),
        "click" => transition(email.mark_clicked(event.count, now)),
        "unsubscribe" => {
            if email.to.trim().is_empty() {
                return Ok(Outcome::Unchanged);
            }
            Ok(Outcome::Unsubscribe(ContactUnsubscribe {
                id: 0,
                created_by: email.created_by,
                created: now,
                list_id: email.list_id,
                contact_id: email.contact_id,
                email_id: email.id,
                email: email.to.clone(),
                unsubscribed: true,
            }))
        }
        other => Err(format!("unknown tracker event '{other}'")),
    }
}

fn apply_provider(
    email: &mut EmailRecord,
    kind: &str,
    event: &TrackerEvent,
) -> Result<Outcome, String> {
    match kind {
        "bounce" => transition(email.mark_bounced(event.reason.clone())),
        "delivered" => transition(email.mark_delivered()),
        "spamreport" => transition(email.mark_spam()),
        "open" => transition(email.mark_provider_opened()),
        "click" => transition(email.mark_provider_clicked()),
        "dropped" => transition(email.mark_dropped()),
        other => Err(format!("unknown provider event '{other}'")),
    }
}

/// Store the message id when the record has none for its method yet.
fn record_provider_id(email: &mut EmailRecord, message_id: &str) -> bool {
    let method = email.method.unwrap_or_default();
    if !method.has_provider_id_field() || email.provider_id().is_some() {
        return false;
    }
    email.method = Some(method);
    email.set_provider_id(message_id);
    true
}
