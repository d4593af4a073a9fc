//! Per-provider daily send usage.

use chrono::{DateTime, Utc};
use outreach_core::config::ProviderLimitsConfig;
use outreach_core::error::OutreachResult;
use outreach_core::search::{EmailFilter, PageRequest, SearchIndex};
use outreach_core::types::{ProviderUsage, SendMethod, UserId};
use std::sync::Arc;

pub struct ProviderLimits {
    index: Arc<dyn SearchIndex>,
    config: ProviderLimitsConfig,
}

impl ProviderLimits {
    pub fn new(index: Arc<dyn SearchIndex>, config: ProviderLimitsConfig) -> Self {
        Self { index, config }
    }

    /// Delivered sends created today, per method, against each ceiling.
    pub async fn usage(&self, owner_id: UserId, now: DateTime<Utc>) -> OutreachResult<Vec<ProviderUsage>> {
        let mut usage = Vec::with_capacity(SendMethod::ALL.len());
        for method in SendMethod::ALL {
            let filter = EmailFilter {
                created_on: Some(now.date_naive()),
                is_sent: Some(true),
                delivered: Some(true),
                method: Some(method),
                ..EmailFilter::for_owner(owner_id)
            };
            let sent_today = self.index.query_emails(&filter, PageRequest::first(0)).await?.total;
            usage.push(ProviderUsage {
                method,
                sent_today: sent_today as u64,
                daily_limit: self.config.daily_limit(method),
            });
        }
        Ok(usage)
    }
}
