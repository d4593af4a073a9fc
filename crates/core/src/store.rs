//! Record store contract: durable keyed storage for email records.

use crate::error::OutreachResult;
use crate::types::{ContactUnsubscribe, EmailId, EmailRecord};
use async_trait::async_trait;

/// Upper bound on records written in one transactional batch.
pub const MAX_BATCH_SIZE: usize = 300;

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, id: EmailId) -> OutreachResult<Option<EmailRecord>>;

    /// Fetch several records. Missing ids are absent from the result; the
    /// order of the found records follows `ids`.
    async fn get_multi(&self, ids: &[EmailId]) -> OutreachResult<Vec<EmailRecord>>;

    /// Insert a new record, assigning its id. Returns the stored record.
    async fn insert(&self, record: EmailRecord) -> OutreachResult<EmailRecord>;

    async fn put(&self, record: &EmailRecord) -> OutreachResult<()>;

    /// Write all records or none. Fails with `BatchTooLarge` above
    /// [`RecordStore::max_batch_size`].
    async fn put_multi(&self, records: &[EmailRecord]) -> OutreachResult<()>;

    fn max_batch_size(&self) -> usize {
        MAX_BATCH_SIZE
    }

    /// Resolve a record by any stored provider correlation id.
    async fn find_by_provider_id(&self, provider_id: &str) -> OutreachResult<Option<EmailRecord>>;

    async fn insert_unsubscribe(
        &self,
        unsubscribe: ContactUnsubscribe,
    ) -> OutreachResult<ContactUnsubscribe>;
}
