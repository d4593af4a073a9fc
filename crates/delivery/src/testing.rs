//! Fault-injecting collaborators for exercising partial-failure paths.

use crate::store::MemoryEmailStore;
use async_trait::async_trait;
use chrono::NaiveDate;
use outreach_core::error::{OutreachError, OutreachResult};
use outreach_core::provider::ProviderGateway;
use outreach_core::search::{EmailFilter, PageRequest, SearchIndex, SearchPage};
use outreach_core::store::RecordStore;
use outreach_core::types::{CampaignDescriptor, ContactUnsubscribe, EmailId, EmailRecord, UserId};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Wraps a [`MemoryEmailStore`] and fails any batch write that contains a
/// poisoned id.
pub struct FlakyStore {
    inner: MemoryEmailStore,
    poisoned: Mutex<HashSet<EmailId>>,
    unsubscribes_down: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: MemoryEmailStore) -> Self {
        Self {
            inner,
            poisoned: Mutex::new(HashSet::new()),
            unsubscribes_down: AtomicBool::new(false),
        }
    }

    /// Every unsubscribe insert fails from now on.
    pub fn fail_unsubscribes(&self) {
        self.unsubscribes_down.store(true, Ordering::SeqCst);
    }

    pub fn fail_batches_containing(&self, id: EmailId) {
        self.poisoned
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id);
    }

    pub fn inner(&self) -> &MemoryEmailStore {
        &self.inner
    }

    fn check(&self, records: &[EmailRecord]) -> OutreachResult<()> {
        let poisoned = self.poisoned.lock().unwrap_or_else(|e| e.into_inner());
        match records.iter().find(|r| poisoned.contains(&r.id)) {
            Some(r) => Err(OutreachError::Store(format!(
                "injected failure for batch containing {}",
                r.id
            ))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn get(&self, id: EmailId) -> OutreachResult<Option<EmailRecord>> {
        self.inner.get(id).await
    }

    async fn get_multi(&self, ids: &[EmailId]) -> OutreachResult<Vec<EmailRecord>> {
        self.inner.get_multi(ids).await
    }

    async fn insert(&self, record: EmailRecord) -> OutreachResult<EmailRecord> {
        self.inner.insert(record).await
    }

    async fn put(&self, record: &EmailRecord) -> OutreachResult<()> {
        self.check(std::slice::from_ref(record))?;
        self.inner.put(record).await
    }

    async fn put_multi(&self, records: &[EmailRecord]) -> OutreachResult<()> {
        self.check(records)?;
        self.inner.put_multi(records).await
    }

    fn max_batch_size(&self) -> usize {
        self.inner.max_batch_size()
    }

    async fn find_by_provider_id(&self, provider_id: &str) -> OutreachResult<Option<EmailRecord>> {
        self.inner.find_by_provider_id(provider_id).await
    }

    async fn insert_unsubscribe(
        &self,
        unsubscribe: ContactUnsubscribe,
    ) -> OutreachResult<ContactUnsubscribe> {
        if self.unsubscribes_down.load(Ordering::SeqCst) {
            return Err(OutreachError::Store(
                "injected failure for unsubscribe insert".to_string(),
            ));
        }
        self.inner.insert_unsubscribe(unsubscribe).await
    }
}

#[async_trait]
impl SearchIndex for FlakyStore {
    async fn query_emails(
        &self,
        filter: &EmailFilter,
        page: PageRequest,
    ) -> OutreachResult<SearchPage<EmailRecord>> {
        self.inner.query_emails(filter, page).await
    }

    async fn query_campaigns(
        &self,
        owner_id: UserId,
        since: Option<NaiveDate>,
        page: PageRequest,
    ) -> OutreachResult<SearchPage<CampaignDescriptor>> {
        self.inner.query_campaigns(owner_id, since, page).await
    }
}

/// Records every submission; refuses ids marked as rejected.
#[derive(Default)]
pub struct RecordingGateway {
    submitted: Mutex<Vec<EmailId>>,
    rejected: Mutex<HashSet<EmailId>>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject(&self, id: EmailId) {
        self.rejected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id);
    }

    pub fn submitted(&self) -> Vec<EmailId> {
        self.submitted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl ProviderGateway for RecordingGateway {
    async fn submit(&self, email: &EmailRecord) -> OutreachResult<Option<String>> {
        if self
            .rejected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&email.id)
        {
            return Err(OutreachError::Internal(anyhow::anyhow!(
                "provider rejected email {}",
                email.id
            )));
        }
        self.submitted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(email.id);
        let method = email.method.unwrap_or_default();
        Ok(method
            .has_provider_id_field()
            .then(|| format!("msg{}", email.id)))
    }
}
