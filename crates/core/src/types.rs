//! Email Record data model and the derived campaign/analytics types.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

pub type EmailId = i64;
pub type UserId = i64;

/// Subject stored on sends that were committed without one.
pub const NO_SUBJECT: &str = "(no subject)";

// ─── Send Method ───────────────────────────────────────────────────────────

/// Delivery channel that submitted an email and owns its correlation id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum SendMethod {
    #[default]
    SendGrid,
    Smtp,
    Gmail,
    Outlook,
    SparkPost,
}

impl SendMethod {
    pub const ALL: [SendMethod; 5] = [
        SendMethod::SendGrid,
        SendMethod::Smtp,
        SendMethod::Gmail,
        SendMethod::Outlook,
        SendMethod::SparkPost,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SendMethod::SendGrid => "sendgrid",
            SendMethod::Smtp => "smtp",
            SendMethod::Gmail => "gmail",
            SendMethod::Outlook => "outlook",
            SendMethod::SparkPost => "sparkpost",
        }
    }

    /// Relay methods send on the user's behalf from platform infrastructure,
    /// so the sender address must be one the user has verified.
    pub fn requires_confirmed_sender(&self) -> bool {
        matches!(self, SendMethod::SendGrid | SendMethod::SparkPost)
    }

    /// Whether the provider hands back a correlation id we persist.
    pub fn has_provider_id_field(&self) -> bool {
        matches!(
            self,
            SendMethod::SendGrid | SendMethod::Gmail | SendMethod::SparkPost
        )
    }
}

impl fmt::Display for SendMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SendMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sendgrid" => Ok(SendMethod::SendGrid),
            "smtp" => Ok(SendMethod::Smtp),
            "gmail" => Ok(SendMethod::Gmail),
            "outlook" => Ok(SendMethod::Outlook),
            "sparkpost" => Ok(SendMethod::SparkPost),
            other => Err(format!("unknown send method '{other}'")),
        }
    }
}

// ─── Email Record ──────────────────────────────────────────────────────────

/// One outbound email message and its delivery lifecycle.
///
/// `is_sent` means the user committed the send; `delivered` means a provider
/// (or a tracking hit) confirmed handoff. Engagement counters only move
/// forward. Records are never hard-deleted; `archived` hides them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct EmailRecord {
    pub id: EmailId,
    pub created_by: UserId,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,

    pub list_id: Option<i64>,
    pub template_id: Option<i64>,
    pub contact_id: Option<i64>,
    pub team_id: Option<i64>,

    pub method: Option<SendMethod>,

    pub to: String,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub from_email: String,
    pub sender: String,

    pub subject: String,
    pub base_subject: String,
    pub body: String,
    pub attachments: Vec<i64>,

    pub is_sent: bool,
    pub send_at: Option<DateTime<Utc>>,
    /// Set once the record was handed to its provider.
    pub dispatched_at: Option<DateTime<Utc>>,
    pub cancel: bool,
    pub delivered: bool,

    pub bounced: bool,
    pub bounced_reason: Option<String>,
    pub spam: bool,
    pub dropped: bool,

    pub opened: u32,
    pub clicked: u32,
    pub sendgrid_opened: u32,
    pub sendgrid_clicked: u32,

    pub archived: bool,

    pub sendgrid_id: Option<String>,
    pub gmail_id: Option<String>,
    pub gmail_thread_id: Option<String>,
    pub sparkpost_id: Option<String>,
    pub batch_id: Option<String>,
}

impl EmailRecord {
    /// A fresh draft owned by `created_by`.
    pub fn draft(created_by: UserId, to: impl Into<String>, subject: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            created_by,
            created: now,
            updated: now,
            to: to.into(),
            subject: subject.into(),
            ..Default::default()
        }
    }

    /// Grouping subject: `base_subject` wins when set.
    pub fn campaign_subject(&self) -> &str {
        if self.base_subject.is_empty() {
            &self.subject
        } else {
            &self.base_subject
        }
    }

    pub fn created_day(&self) -> NaiveDate {
        self.created.date_naive()
    }

    /// True once the scheduled time (if any) has passed.
    pub fn is_released(&self, now: DateTime<Utc>) -> bool {
        self.send_at.map_or(true, |at| at <= now)
    }

    pub fn is_scheduled(&self, now: DateTime<Utc>) -> bool {
        !self.is_released(now)
    }

    pub fn is_dispatched(&self) -> bool {
        self.dispatched_at.is_some()
    }

    /// Correlation id for the record's method, when that method has one.
    pub fn provider_id(&self) -> Option<&str> {
        let field = match self.method? {
            SendMethod::SendGrid => &self.sendgrid_id,
            SendMethod::Gmail => &self.gmail_id,
            SendMethod::SparkPost => &self.sparkpost_id,
            SendMethod::Smtp => &self.batch_id,
            SendMethod::Outlook => return None,
        };
        field.as_deref().filter(|id| !id.is_empty())
    }

    /// Whether the provider submission can be verified from stored ids.
    /// Methods that never return a correlation id are taken on trust.
    pub fn has_provider_confirmation(&self) -> bool {
        match self.method {
            Some(method) if method.has_provider_id_field() => self.provider_id().is_some(),
            _ => true,
        }
    }

    /// Record a provider message id in the field owned by `method`.
    pub fn set_provider_id(&mut self, provider_id: impl Into<String>) {
        let id = Some(provider_id.into());
        match self.method.unwrap_or_default() {
            SendMethod::SendGrid => self.sendgrid_id = id,
            SendMethod::Gmail => self.gmail_id = id,
            SendMethod::SparkPost => self.sparkpost_id = id,
            SendMethod::Smtp => self.batch_id = id,
            SendMethod::Outlook => {}
        }
    }

    /// Every provider correlation id stored on the record.
    pub fn provider_ids(&self) -> impl Iterator<Item = &str> {
        [
            &self.sendgrid_id,
            &self.gmail_id,
            &self.sparkpost_id,
            &self.batch_id,
        ]
        .into_iter()
        .filter_map(|id| id.as_deref())
        .filter(|id| !id.is_empty())
    }
}

// ─── Unsubscribe ───────────────────────────────────────────────────────────

/// Advisory unsubscribe created from a tracking event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, ToSchema)]
pub struct ContactUnsubscribe {
    pub id: i64,
    pub created_by: UserId,
    pub created: DateTime<Utc>,
    pub list_id: Option<i64>,
    pub contact_id: Option<i64>,
    pub email_id: EmailId,
    pub email: String,
    pub unsubscribed: bool,
}

// ─── Campaigns ─────────────────────────────────────────────────────────────

/// (day, subject-or-base-subject, owner) grouping produced by the index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct CampaignDescriptor {
    pub owner_id: UserId,
    pub date: NaiveDate,
    pub subject: String,
    #[serde(default)]
    pub base_subject: String,
}

impl CampaignDescriptor {
    pub fn grouping_subject(&self) -> &str {
        if self.base_subject.is_empty() {
            &self.subject
        } else {
            &self.base_subject
        }
    }
}

/// Delivery analytics for one campaign.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, ToSchema)]
pub struct CampaignStats {
    pub date: Option<NaiveDate>,
    pub subject: String,
    pub base_subject: String,
    pub owner_id: UserId,

    pub delivered: u64,
    pub opens: u64,
    pub unique_opens: u64,
    pub unique_opens_percentage: f64,
    pub clicks: u64,
    pub unique_clicks: u64,
    pub unique_clicks_percentage: f64,
    pub bounces: u64,

    pub is_scheduled: bool,
    pub show: bool,
}

/// Daily send counters per provider against their configured ceilings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
pub struct ProviderUsage {
    pub method: SendMethod,
    pub sent_today: u64,
    pub daily_limit: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_campaign_subject_prefers_base() {
        let mut email = EmailRecord::draft(1, "a@x.com", "Hello Anna");
        assert_eq!(email.campaign_subject(), "Hello Anna");
        email.base_subject = "Hello {name}".into();
        assert_eq!(email.campaign_subject(), "Hello {name}");
    }

    #[test]
    fn test_release_gate() {
        let now = Utc::now();
        let mut email = EmailRecord::draft(1, "a@x.com", "s");
        assert!(email.is_released(now));
        email.send_at = Some(now + Duration::hours(1));
        assert!(email.is_scheduled(now));
        email.send_at = Some(now - Duration::minutes(1));
        assert!(email.is_released(now));
    }

    #[test]
    fn test_provider_confirmation_per_method() {
        let mut email = EmailRecord::draft(1, "a@x.com", "s");
        email.method = Some(SendMethod::SendGrid);
        assert!(!email.has_provider_confirmation());
        email.set_provider_id("sg-1");
        assert_eq!(email.sendgrid_id.as_deref(), Some("sg-1"));
        assert!(email.has_provider_confirmation());

        email.method = Some(SendMethod::Outlook);
        email.sendgrid_id = None;
        assert!(email.has_provider_confirmation());

        email.method = Some(SendMethod::Gmail);
        assert!(!email.has_provider_confirmation());
        email.set_provider_id("g-1");
        assert_eq!(email.provider_id(), Some("g-1"));
    }

    #[test]
    fn test_send_method_parsing() {
        assert_eq!("SparkPost".parse::<SendMethod>().unwrap(), SendMethod::SparkPost);
        assert!("carrier-pigeon".parse::<SendMethod>().is_err());
        let json = serde_json::to_string(&SendMethod::SendGrid).unwrap();
        assert_eq!(json, "\"sendgrid\"");
    }
}
