//! ClickHouse implementation of the email search index.
//!
//! The table is a `ReplacingMergeTree` keyed by `(created_by, id)`, so every
//! re-index of a record replaces the previous version; reads use `FINAL`.

use crate::row::{where_clause, BindValue, CampaignRow, EmailRow, CREATE_EMAILS_TABLE, EMAILS_TABLE};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use outreach_core::config::ClickHouseConfig;
use outreach_core::error::{OutreachError, OutreachResult};
use outreach_core::search::{EmailFilter, PageRequest, SearchIndex, SearchPage};
use outreach_core::types::{CampaignDescriptor, EmailRecord, UserId};
use tracing::{debug, info, warn};

fn ch_err(e: clickhouse::error::Error) -> OutreachError {
    OutreachError::Index(e.to_string())
}

fn apply_binds(mut query: clickhouse::query::Query, binds: Vec<BindValue>) -> clickhouse::query::Query {
    for bind in binds {
        query = match bind {
            BindValue::Int(v) => query.bind(v),
            BindValue::Str(v) => query.bind(v),
            BindValue::Bool(v) => query.bind(v),
        };
    }
    query
}

#[derive(Clone)]
pub struct ClickHouseEmailIndex {
    client: clickhouse::Client,
}

impl ClickHouseEmailIndex {
    pub async fn new(config: &ClickHouseConfig) -> anyhow::Result<Self> {
        let client = clickhouse::Client::default()
            .with_url(&config.url)
            .with_database(&config.database);

        let index = Self { client };
        index.ensure_schema().await?;

        info!(url = %config.url, database = %config.database, "ClickHouse email index ready");
        Ok(index)
    }

    async fn ensure_schema(&self) -> anyhow::Result<()> {
        self.client.query(CREATE_EMAILS_TABLE).execute().await?;
        info!("ClickHouse schema verified");
        Ok(())
    }

    /// Write the current state of `records`, replacing earlier versions.
    pub async fn upsert(&self, records: &[EmailRecord]) -> OutreachResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let version = Utc::now().timestamp_micros().max(0) as u64;

        let mut insert = self.client.insert(EMAILS_TABLE).map_err(ch_err)?;
        for record in records {
            let row = EmailRow::from_record(record, version)?;
            insert.write(&row).await.map_err(ch_err)?;
        }
        insert.end().await.map_err(ch_err)?;

        debug!(count = records.len(), "Indexed email batch");
        Ok(records.len())
    }
}

#[async_trait]
impl SearchIndex for ClickHouseEmailIndex {
    async fn query_emails(
        &self,
        filter: &EmailFilter,
        page: PageRequest,
    ) -> OutreachResult<SearchPage<EmailRecord>> {
        let (predicate, binds) = where_clause(filter);

        let count_sql = format!("SELECT count() FROM {EMAILS_TABLE} FINAL{predicate}");
        let total = apply_binds(self.client.query(&count_sql), binds.clone())
            .fetch_one::<u64>()
            .await
            .map_err(ch_err)? as usize;

        if page.limit == 0 || page.offset >= total {
            return Ok(SearchPage {
                items: Vec::new(),
                total,
            });
        }

        let sql = format!(
            "SELECT ?fields FROM {EMAILS_TABLE} FINAL{predicate} ORDER BY created_ms DESC, id DESC LIMIT {} OFFSET {}",
            page.limit, page.offset
        );
        let rows = apply_binds(self.client.query(&sql), binds)
            .fetch_all::<EmailRow>()
            .await
            .map_err(ch_err)?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id;
            match row.into_record() {
                Ok(record) => items.push(record),
                Err(e) => warn!(email_id = id, error = %e, "Skipping undecodable index row"),
            }
        }
        Ok(SearchPage { items, total })
    }

    async fn query_campaigns(
        &self,
        owner_id: UserId,
        since: Option<NaiveDate>,
        page: PageRequest,
    ) -> OutreachResult<SearchPage<CampaignDescriptor>> {
        let since = since.map(crate::row::day_string).unwrap_or_default();
        let grouped = format!(
            "SELECT created_day, if(base_subject = '', subject, base_subject) AS grouping_subject, base_subject \
             FROM {EMAILS_TABLE} FINAL \
             WHERE created_by = ? AND is_sent AND NOT cancel AND created_day >= ? \
             GROUP BY created_day, grouping_subject, base_subject"
        );

        let total = self
            .client
            .query(&format!("SELECT count() FROM ({grouped})"))
            .bind(owner_id)
            .bind(since.as_str())
            .fetch_one::<u64>()
            .await
            .map_err(ch_err)? as usize;

        let rows = self
            .client
            .query(&format!(
                "{grouped} ORDER BY created_day DESC, grouping_subject LIMIT {} OFFSET {}",
                page.limit, page.offset
            ))
            .bind(owner_id)
            .bind(since.as_str())
            .fetch_all::<CampaignRow>()
            .await
            .map_err(ch_err)?;

        let items = rows
            .into_iter()
            .filter_map(|row| row.into_descriptor(owner_id))
            .collect();
        Ok(SearchPage { items, total })
    }
}
