//! Campaign Aggregator.
//!
//! A campaign is every sent record of one owner sharing a creation day and a
//! grouping subject. Stats are recomputed from the search index page by page
//! and cached under the campaign key.

use chrono::{NaiveDate, Utc};
use outreach_core::cache::CampaignCache;
use outreach_core::campaign_key::descriptor_key;
use outreach_core::error::OutreachResult;
use outreach_core::search::{EmailFilter, EngagementFilter, PageRequest, SearchIndex, SearchPage};
use outreach_core::types::{CampaignDescriptor, CampaignStats, EmailRecord, UserId, NO_SUBJECT};
use std::sync::Arc;
use tracing::{debug, warn};

/// Running totals over the counted members of a campaign.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CampaignTally {
    pub delivered: u64,
    pub opens: u64,
    pub unique_opens: u64,
    pub clicks: u64,
    pub unique_clicks: u64,
    pub bounces: u64,
}

impl CampaignTally {
    /// Records with no opens and no way to verify the provider submission
    /// are left out.
    pub fn counts(email: &EmailRecord) -> bool {
        !email.archived && (email.opened > 0 || email.has_provider_confirmation())
    }

    pub fn add(&mut self, email: &EmailRecord) {
        self.delivered += 1;
        self.opens += u64::from(email.opened);
        self.clicks += u64::from(email.clicked);
        if email.opened > 0 {
            self.unique_opens += 1;
        }
        if email.clicked > 0 {
            self.unique_clicks += 1;
        }
        if email.bounced {
            self.bounces += 1;
        }
    }

    /// Fill the counters and derived percentages of `stats`.
    pub fn finish(&self, stats: &mut CampaignStats) {
        stats.delivered = self.delivered;
        stats.opens = self.opens;
        stats.clicks = self.clicks;
        stats.unique_opens = self.unique_opens;
        stats.unique_clicks = self.unique_clicks;
        stats.bounces = self.bounces;
        stats.unique_opens_percentage = 0.0;
        stats.unique_clicks_percentage = 0.0;
        stats.show = false;

        let effective = self.delivered.saturating_sub(self.bounces);
        if effective == 0 {
            return;
        }
        stats.unique_opens = self.unique_opens.min(effective);
        stats.unique_clicks = self.unique_clicks.min(effective);
        stats.unique_opens_percentage = 100.0 * stats.unique_opens as f64 / effective as f64;
        stats.unique_clicks_percentage = 100.0 * stats.unique_clicks as f64 / effective as f64;
        stats.show = self.delivered > 0;
    }
}

pub struct CampaignAggregator {
    index: Arc<dyn SearchIndex>,
    cache: Arc<dyn CampaignCache>,
    page_size: usize,
}

impl CampaignAggregator {
    pub fn new(index: Arc<dyn SearchIndex>, cache: Arc<dyn CampaignCache>, page_size: usize) -> Self {
        Self {
            index,
            cache,
            page_size: page_size.max(1),
        }
    }

    /// Campaigns of `owner_id` newest first, each with its stats.
    pub async fn list_campaigns(
        &self,
        owner_id: UserId,
        since: Option<NaiveDate>,
        page: PageRequest,
    ) -> OutreachResult<SearchPage<CampaignStats>> {
        let descriptors = self.index.query_campaigns(owner_id, since, page).await?;
        let mut items = Vec::with_capacity(descriptors.items.len());
        for descriptor in &descriptors.items {
            items.push(self.campaign(descriptor).await?);
        }
        Ok(SearchPage {
            items,
            total: descriptors.total,
        })
    }

    /// Stats for one campaign, served from the cache when present.
    pub async fn campaign(&self, descriptor: &CampaignDescriptor) -> OutreachResult<CampaignStats> {
        let key = descriptor_key(descriptor);
        match self.cache.get(&key).await {
            Ok(Some(stats)) => {
                metrics::counter!("outreach_campaign_cache_hits_total").increment(1);
                return Ok(stats);
            }
            Ok(None) => {}
            Err(e) => warn!(campaign_key = %key, error = %e, "Campaign cache read failed"),
        }

        let stats = self.compute(descriptor).await?;
        if let Err(e) = self.cache.put(&key, &stats).await {
            warn!(campaign_key = %key, error = %e, "Campaign cache write failed");
        }
        Ok(stats)
    }

    /// Recompute from the index, paging until the reported total is reached.
    pub async fn compute(&self, descriptor: &CampaignDescriptor) -> OutreachResult<CampaignStats> {
        let now = Utc::now();
        let filter = EmailFilter::campaign(descriptor);
        let grouping = descriptor.grouping_subject();

        let mut stats = CampaignStats {
            date: Some(descriptor.date),
            subject: descriptor.subject.clone(),
            base_subject: descriptor.base_subject.clone(),
            owner_id: descriptor.owner_id,
            ..Default::default()
        };
        let mut tally = CampaignTally::default();
        let mut page = PageRequest::first(self.page_size);
        let mut scanned = 0usize;

        loop {
            let hits = self.index.query_emails(&filter, page).await?;
            let fetched = hits.items.len();
            scanned += fetched;

            for email in &hits.items {
                if email.campaign_subject() != grouping {
                    continue;
                }
                if CampaignTally::counts(email) {
                    tally.add(email);
                }
            }

            if fetched == 0 || scanned >= hits.total {
                break;
            }
            page = page.next();
        }

        // Pending members never reach the tally; they only flag the campaign.
        let pending = EmailFilter::campaign_scheduled(descriptor, now);
        stats.is_scheduled = self
            .index
            .query_emails(&pending, PageRequest::first(0))
            .await?
            .total
            > 0;

        if stats.subject.is_empty() {
            stats.subject = NO_SUBJECT.to_string();
        }
        tally.finish(&mut stats);
        debug!(
            owner_id = descriptor.owner_id,
            date = %descriptor.date,
            scanned,
            delivered = stats.delivered,
            "Campaign stats computed"
        );
        Ok(stats)
    }

    /// Members of one campaign, optionally narrowed by engagement.
    pub async fn campaign_emails(
        &self,
        owner_id: UserId,
        date: NaiveDate,
        subject: &str,
        base_subject: &str,
        engagement: Option<EngagementFilter>,
        page: PageRequest,
    ) -> OutreachResult<SearchPage<EmailRecord>> {
        let descriptor = CampaignDescriptor {
            owner_id,
            date,
            subject: subject.to_string(),
            base_subject: base_subject.to_string(),
        };
        // Drill-down lists every live member, confirmed or not.
        let filter = EmailFilter {
            archived: Some(false),
            delivered: None,
            engagement,
            ..EmailFilter::campaign(&descriptor)
        };
        self.index.query_emails(&filter, page).await
    }
}
