//! Search-index queries over email records.
//!
//! The index is eventually consistent with the record store; it is fed by the
//! `Send`/`Changed` notifications. [`EmailFilter::matches`] is the reference
//! semantics every backend must reproduce.

use crate::error::OutreachResult;
use crate::types::{CampaignDescriptor, EmailRecord, SendMethod, UserId};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Engagement drill-down used by the campaign email listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EngagementFilter {
    Open,
    Click,
    Bounce,
    Unopen,
    Unclick,
}

impl std::str::FromStr for EngagementFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" => Ok(EngagementFilter::Open),
            "click" => Ok(EngagementFilter::Click),
            "bounce" => Ok(EngagementFilter::Bounce),
            "unopen" => Ok(EngagementFilter::Unopen),
            "unclick" => Ok(EngagementFilter::Unclick),
            other => Err(format!("unknown engagement filter '{other}'")),
        }
    }
}

/// Position of `send_at` relative to a reference instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendAtFilter {
    /// Scheduled strictly after the instant.
    Future(DateTime<Utc>),
    /// Unscheduled, or scheduled at or before the instant.
    Elapsed(DateTime<Utc>),
    /// Scheduled, and the scheduled time is at or before the instant.
    Due(DateTime<Utc>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmailFilter {
    pub owner_id: Option<UserId>,
    pub created_on: Option<NaiveDate>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    /// Matches either the subject or the base subject.
    pub subject: Option<String>,
    /// Matches the base subject only; takes precedence over `subject`.
    pub base_subject: Option<String>,
    pub is_sent: Option<bool>,
    pub cancel: Option<bool>,
    pub delivered: Option<bool>,
    pub archived: Option<bool>,
    pub send_at: Option<SendAtFilter>,
    pub dispatched: Option<bool>,
    pub method: Option<SendMethod>,
    pub engagement: Option<EngagementFilter>,
}

impl EmailFilter {
    pub fn for_owner(owner_id: UserId) -> Self {
        Self {
            owner_id: Some(owner_id),
            ..Default::default()
        }
    }

    /// Sent, not cancelled, still in the future.
    pub fn scheduled(owner_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            owner_id: Some(owner_id),
            is_sent: Some(true),
            cancel: Some(false),
            delivered: Some(false),
            send_at: Some(SendAtFilter::Future(now)),
            ..Default::default()
        }
    }

    /// Scheduled sends whose time has come and that were not handed to a
    /// provider yet.
    pub fn due(now: DateTime<Utc>) -> Self {
        Self {
            is_sent: Some(true),
            cancel: Some(false),
            delivered: Some(false),
            send_at: Some(SendAtFilter::Due(now)),
            dispatched: Some(false),
            ..Default::default()
        }
    }

    /// Members of a campaign that count towards its stats: sent, not
    /// cancelled and confirmed delivered.
    pub fn campaign(descriptor: &CampaignDescriptor) -> Self {
        let mut filter = Self {
            owner_id: Some(descriptor.owner_id),
            created_on: Some(descriptor.date),
            is_sent: Some(true),
            cancel: Some(false),
            delivered: Some(true),
            ..Default::default()
        };
        if descriptor.base_subject.is_empty() {
            filter.subject = Some(descriptor.subject.clone());
        } else {
            filter.base_subject = Some(descriptor.base_subject.clone());
        }
        filter
    }

    /// Members of a campaign still waiting for their send time.
    pub fn campaign_scheduled(descriptor: &CampaignDescriptor, now: DateTime<Utc>) -> Self {
        Self {
            delivered: None,
            send_at: Some(SendAtFilter::Future(now)),
            ..Self::campaign(descriptor)
        }
    }

    pub fn matches(&self, email: &EmailRecord) -> bool {
        if self.owner_id.is_some_and(|o| o != email.created_by) {
            return false;
        }
        if self.created_on.is_some_and(|d| d != email.created_day()) {
            return false;
        }
        if self.created_from.is_some_and(|from| email.created < from) {
            return false;
        }
        if self.created_to.is_some_and(|to| email.created > to) {
            return false;
        }
        if let Some(base) = &self.base_subject {
            if &email.base_subject != base {
                return false;
            }
        } else if let Some(subject) = &self.subject {
            if &email.subject != subject && &email.base_subject != subject {
                return false;
            }
        }
        if self.is_sent.is_some_and(|v| v != email.is_sent)
            || self.cancel.is_some_and(|v| v != email.cancel)
            || self.delivered.is_some_and(|v| v != email.delivered)
            || self.archived.is_some_and(|v| v != email.archived)
            || self.dispatched.is_some_and(|v| v != email.is_dispatched())
        {
            return false;
        }
        match self.send_at {
            Some(SendAtFilter::Future(now)) if !email.is_scheduled(now) => return false,
            Some(SendAtFilter::Elapsed(now)) if !email.is_released(now) => return false,
            Some(SendAtFilter::Due(now)) if !email.send_at.is_some_and(|at| at <= now) => {
                return false
            }
            _ => {}
        }
        if self.method.is_some() && self.method != email.method {
            return false;
        }
        match self.engagement {
            Some(EngagementFilter::Open) => email.opened > 0,
            Some(EngagementFilter::Click) => email.clicked > 0,
            Some(EngagementFilter::Bounce) => email.bounced,
            Some(EngagementFilter::Unopen) => email.opened == 0,
            Some(EngagementFilter::Unclick) => email.clicked == 0,
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
}

impl PageRequest {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }

    pub fn first(limit: usize) -> Self {
        Self { offset: 0, limit }
    }

    pub fn next(&self) -> Self {
        Self {
            offset: self.offset + self.limit,
            limit: self.limit,
        }
    }
}

/// One page of hits plus the total number of matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPage<T> {
    pub items: Vec<T>,
    pub total: usize,
}

impl<T> SearchPage<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
        }
    }
}

/// Query surface of the search index.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Matching emails ordered by creation time, newest first.
    async fn query_emails(
        &self,
        filter: &EmailFilter,
        page: PageRequest,
    ) -> OutreachResult<SearchPage<EmailRecord>>;

    /// Distinct (day, subject, base subject) groups of an owner's sent
    /// emails, newest day first.
    async fn query_campaigns(
        &self,
        owner_id: UserId,
        since: Option<NaiveDate>,
        page: PageRequest,
    ) -> OutreachResult<SearchPage<CampaignDescriptor>>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn email(subject: &str) -> EmailRecord {
        let mut e = EmailRecord::draft(1, "a@x.com", subject);
        e.is_sent = true;
        e
    }

    #[test]
    fn test_subject_matching() {
        let mut e = email("Hi Anna");
        e.base_subject = "Hi {name}".into();

        let by_subject = EmailFilter {
            subject: Some("Hi Anna".into()),
            ..Default::default()
        };
        assert!(by_subject.matches(&e));

        let by_base = EmailFilter {
            subject: Some("Hi Anna".into()),
            base_subject: Some("Hi {name}".into()),
            ..Default::default()
        };
        assert!(by_base.matches(&e));

        let wrong_base = EmailFilter {
            subject: Some("Hi Anna".into()),
            base_subject: Some("Other".into()),
            ..Default::default()
        };
        assert!(!wrong_base.matches(&e));
    }

    #[test]
    fn test_scheduled_filter() {
        let now = Utc::now();
        let mut e = email("s");
        let filter = EmailFilter::scheduled(1, now);
        assert!(!filter.matches(&e));

        e.send_at = Some(now + Duration::hours(2));
        assert!(filter.matches(&e));

        e.cancel = true;
        assert!(!filter.matches(&e));
    }

    #[test]
    fn test_due_filter_excludes_immediate_sends() {
        let now = Utc::now();
        let mut e = email("s");
        assert!(!EmailFilter::due(now).matches(&e));
        e.send_at = Some(now - Duration::minutes(1));
        assert!(EmailFilter::due(now).matches(&e));
        e.send_at = Some(now + Duration::minutes(1));
        assert!(!EmailFilter::due(now).matches(&e));

        e.send_at = Some(now - Duration::minutes(1));
        e.dispatched_at = Some(now);
        assert!(!EmailFilter::due(now).matches(&e));
    }

    #[test]
    fn test_campaign_filter_counts_delivered_members_only() {
        let now = Utc::now();
        let descriptor = CampaignDescriptor {
            owner_id: 1,
            date: now.date_naive(),
            subject: "s".into(),
            base_subject: String::new(),
        };
        let members = EmailFilter::campaign(&descriptor);
        let scheduled = EmailFilter::campaign_scheduled(&descriptor, now);

        let mut e = email("s");
        assert!(!members.matches(&e));
        e.delivered = true;
        assert!(members.matches(&e));

        let mut pending = email("s");
        pending.send_at = Some(now + Duration::hours(3));
        assert!(!members.matches(&pending));
        assert!(scheduled.matches(&pending));

        pending.cancel = true;
        assert!(!scheduled.matches(&pending));
        pending.delivered = true;
        assert!(!members.matches(&pending));
    }

    #[test]
    fn test_engagement_filters() {
        let mut e = email("s");
        let with = |f| EmailFilter {
            engagement: Some(f),
            ..Default::default()
        };
        assert!(with(EngagementFilter::Unopen).matches(&e));
        assert!(!with(EngagementFilter::Open).matches(&e));
        e.opened = 2;
        e.bounced = true;
        assert!(with(EngagementFilter::Open).matches(&e));
        assert!(with(EngagementFilter::Bounce).matches(&e));
        assert!(with(EngagementFilter::Unclick).matches(&e));
        assert_eq!("UNCLICK".parse::<EngagementFilter>().unwrap(), EngagementFilter::Unclick);
    }

    #[test]
    fn test_page_request_next() {
        let page = PageRequest::first(750).next().next();
        assert_eq!(page.offset, 1500);
        assert_eq!(page.limit, 750);
    }
}
