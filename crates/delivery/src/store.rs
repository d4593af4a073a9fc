//! In-memory record store (development mode).
//!
//! Backed by DashMap. Also answers search-index queries directly, so it is
//! always consistent with itself and needs no index sync.

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use outreach_core::error::{OutreachError, OutreachResult};
use outreach_core::search::{EmailFilter, PageRequest, SearchIndex, SearchPage};
use outreach_core::store::{RecordStore, MAX_BATCH_SIZE};
use outreach_core::types::{CampaignDescriptor, ContactUnsubscribe, EmailId, EmailRecord, UserId};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::debug;

pub struct MemoryEmailStore {
    emails: DashMap<EmailId, EmailRecord>,
    unsubscribes: DashMap<i64, ContactUnsubscribe>,
    next_id: AtomicI64,
    next_unsubscribe_id: AtomicI64,
    max_batch_size: usize,
}

impl Default for MemoryEmailStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEmailStore {
    pub fn new() -> Self {
        Self {
            emails: DashMap::new(),
            unsubscribes: DashMap::new(),
            next_id: AtomicI64::new(1),
            next_unsubscribe_id: AtomicI64::new(1),
            max_batch_size: MAX_BATCH_SIZE,
        }
    }

    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Store a record as-is, keeping its id. Used for seeding.
    pub fn seed(&self, record: EmailRecord) {
        self.next_id.fetch_max(record.id + 1, Ordering::SeqCst);
        self.emails.insert(record.id, record);
    }

    pub fn get_sync(&self, id: EmailId) -> Option<EmailRecord> {
        self.emails.get(&id).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.emails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }

    pub fn unsubscribes(&self) -> Vec<ContactUnsubscribe> {
        let mut all: Vec<_> = self.unsubscribes.iter().map(|u| u.clone()).collect();
        all.sort_by_key(|u| u.id);
        all
    }
}

#[async_trait]
impl RecordStore for MemoryEmailStore {
    async fn get(&self, id: EmailId) -> OutreachResult<Option<EmailRecord>> {
        Ok(self.get_sync(id))
    }

    async fn get_multi(&self, ids: &[EmailId]) -> OutreachResult<Vec<EmailRecord>> {
        Ok(ids.iter().filter_map(|id| self.get_sync(*id)).collect())
    }

    async fn insert(&self, mut record: EmailRecord) -> OutreachResult<EmailRecord> {
        if record.id == 0 {
            record.id = self.allocate_id();
        } else {
            self.next_id.fetch_max(record.id + 1, Ordering::SeqCst);
        }
        self.emails.insert(record.id, record.clone());
        Ok(record)
    }

    async fn put(&self, record: &EmailRecord) -> OutreachResult<()> {
        if record.id == 0 {
            return Err(OutreachError::Store("record has no id".into()));
        }
        self.emails.insert(record.id, record.clone());
        Ok(())
    }

    async fn put_multi(&self, records: &[EmailRecord]) -> OutreachResult<()> {
        if records.len() > self.max_batch_size {
            return Err(OutreachError::BatchTooLarge {
                size: records.len(),
                limit: self.max_batch_size,
            });
        }
        if records.iter().any(|r| r.id == 0) {
            return Err(OutreachError::Store("record has no id".into()));
        }
        for record in records {
            self.emails.insert(record.id, record.clone());
        }
        debug!(count = records.len(), "Committed email batch");
        Ok(())
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    async fn find_by_provider_id(&self, provider_id: &str) -> OutreachResult<Option<EmailRecord>> {
        if provider_id.is_empty() {
            return Ok(None);
        }
        Ok(self
            .emails
            .iter()
            .find(|r| r.provider_ids().any(|id| id == provider_id))
            .map(|r| r.clone()))
    }

    async fn insert_unsubscribe(
        &self,
        mut unsubscribe: ContactUnsubscribe,
    ) -> OutreachResult<ContactUnsubscribe> {
        unsubscribe.id = self.next_unsubscribe_id.fetch_add(1, Ordering::SeqCst);
        self.unsubscribes.insert(unsubscribe.id, unsubscribe.clone());
        Ok(unsubscribe)
    }
}

fn paginate<T>(mut items: Vec<T>, page: PageRequest) -> SearchPage<T> {
    let total = items.len();
    let items = if page.offset >= total {
        Vec::new()
    } else {
        items.drain(page.offset..).take(page.limit).collect()
    };
    SearchPage { items, total }
}

#[async_trait]
impl SearchIndex for MemoryEmailStore {
    async fn query_emails(
        &self,
        filter: &EmailFilter,
        page: PageRequest,
    ) -> OutreachResult<SearchPage<EmailRecord>> {
        let mut hits: Vec<EmailRecord> = self
            .emails
            .iter()
            .filter(|r| filter.matches(r.value()))
            .map(|r| r.clone())
            .collect();
        hits.sort_by(|a, b| b.created.cmp(&a.created).then(b.id.cmp(&a.id)));
        Ok(paginate(hits, page))
    }

    async fn query_campaigns(
        &self,
        owner_id: UserId,
        since: Option<NaiveDate>,
        page: PageRequest,
    ) -> OutreachResult<SearchPage<CampaignDescriptor>> {
        let groups: BTreeSet<(NaiveDate, String, String)> = self
            .emails
            .iter()
            .filter(|r| r.created_by == owner_id && r.is_sent && !r.cancel)
            .filter(|r| since.map_or(true, |d| r.created_day() >= d))
            .map(|r| {
                (
                    r.created_day(),
                    r.campaign_subject().to_string(),
                    r.base_subject.clone(),
                )
            })
            .collect();

        let descriptors: Vec<CampaignDescriptor> = groups
            .into_iter()
            .rev()
            .map(|(date, subject, base_subject)| CampaignDescriptor {
                owner_id,
                date,
                subject,
                base_subject,
            })
            .collect();
        Ok(paginate(descriptors, page))
    }
}
