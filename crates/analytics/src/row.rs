//! Row schema of the `emails` index table and SQL predicate building.

use chrono::{DateTime, NaiveDate, Utc};
use clickhouse::Row;
use outreach_core::error::OutreachResult;
use outreach_core::search::{EmailFilter, EngagementFilter, SendAtFilter};
use outreach_core::types::{CampaignDescriptor, EmailRecord};
use serde::{Deserialize, Serialize};

pub const EMAILS_TABLE: &str = "emails";

pub const CREATE_EMAILS_TABLE: &str = "CREATE TABLE IF NOT EXISTS emails (
    id Int64,
    created_by Int64,
    created_ms Int64,
    created_day String,
    subject String,
    base_subject String,
    method String,
    is_sent Bool,
    cancel Bool,
    delivered Bool,
    archived Bool,
    dispatched Bool,
    bounced Bool,
    opened UInt32,
    clicked UInt32,
    send_at_ms Int64,
    record String,
    version UInt64
) ENGINE = ReplacingMergeTree(version)
ORDER BY (created_by, id)
PARTITION BY substring(created_day, 1, 7)";

/// One indexed email. Filter columns are denormalised; `record` holds the
/// full JSON document returned to callers.
#[derive(Debug, Clone, PartialEq, Row, Serialize, Deserialize)]
pub struct EmailRow {
    pub id: i64,
    pub created_by: i64,
    pub created_ms: i64,
    pub created_day: String,
    pub subject: String,
    pub base_subject: String,
    pub method: String,
    pub is_sent: bool,
    pub cancel: bool,
    pub delivered: bool,
    pub archived: bool,
    pub dispatched: bool,
    pub bounced: bool,
    pub opened: u32,
    pub clicked: u32,
    /// Zero when unscheduled.
    pub send_at_ms: i64,
    pub record: String,
    pub version: u64,
}

impl EmailRow {
    pub fn from_record(email: &EmailRecord, version: u64) -> OutreachResult<Self> {
        Ok(Self {
            id: email.id,
            created_by: email.created_by,
            created_ms: email.created.timestamp_millis(),
            created_day: day_string(email.created_day()),
            subject: email.subject.clone(),
            base_subject: email.base_subject.clone(),
            method: email.method.map(|m| m.as_str().to_string()).unwrap_or_default(),
            is_sent: email.is_sent,
            cancel: email.cancel,
            delivered: email.delivered,
            archived: email.archived,
            dispatched: email.is_dispatched(),
            bounced: email.bounced,
            opened: email.opened,
            clicked: email.clicked,
            send_at_ms: email.send_at.map(|t| t.timestamp_millis()).unwrap_or(0),
            record: serde_json::to_string(email)?,
            version,
        })
    }

    pub fn into_record(self) -> OutreachResult<EmailRecord> {
        Ok(serde_json::from_str(&self.record)?)
    }
}

/// Distinct campaign group as returned by the grouping query.
#[derive(Debug, Clone, Row, Deserialize)]
pub struct CampaignRow {
    pub created_day: String,
    pub grouping_subject: String,
    pub base_subject: String,
}

impl CampaignRow {
    pub fn into_descriptor(self, owner_id: i64) -> Option<CampaignDescriptor> {
        let date = NaiveDate::parse_from_str(&self.created_day, "%Y-%m-%d").ok()?;
        Some(CampaignDescriptor {
            owner_id,
            date,
            subject: self.grouping_subject,
            base_subject: self.base_subject,
        })
    }
}

pub fn day_string(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

/// Values bound to `?` placeholders, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Int(i64),
    Str(String),
    Bool(bool),
}

/// `WHERE` clause for an [`EmailFilter`]; mirrors `EmailFilter::matches`.
pub fn where_clause(filter: &EmailFilter) -> (String, Vec<BindValue>) {
    let mut clauses: Vec<&'static str> = Vec::new();
    let mut binds = Vec::new();

    if let Some(owner) = filter.owner_id {
        clauses.push("created_by = ?");
        binds.push(BindValue::Int(owner));
    }
    if let Some(day) = filter.created_on {
        clauses.push("created_day = ?");
        binds.push(BindValue::Str(day_string(day)));
    }
    if let Some(from) = filter.created_from {
        clauses.push("created_ms >= ?");
        binds.push(BindValue::Int(from.timestamp_millis()));
    }
    if let Some(to) = filter.created_to {
        clauses.push("created_ms <= ?");
        binds.push(BindValue::Int(to.timestamp_millis()));
    }
    if let Some(base) = &filter.base_subject {
        clauses.push("base_subject = ?");
        binds.push(BindValue::Str(base.clone()));
    } else if let Some(subject) = &filter.subject {
        clauses.push("(subject = ? OR base_subject = ?)");
        binds.push(BindValue::Str(subject.clone()));
        binds.push(BindValue::Str(subject.clone()));
    }
    for (column, value) in [
        ("is_sent = ?", filter.is_sent),
        ("cancel = ?", filter.cancel),
        ("delivered = ?", filter.delivered),
        ("archived = ?", filter.archived),
        ("dispatched = ?", filter.dispatched),
    ] {
        if let Some(v) = value {
            clauses.push(column);
            binds.push(BindValue::Bool(v));
        }
    }
    match filter.send_at {
        Some(SendAtFilter::Future(now)) => {
            clauses.push("send_at_ms > ?");
            binds.push(BindValue::Int(millis(now)));
        }
        Some(SendAtFilter::Elapsed(now)) => {
            clauses.push("send_at_ms <= ?");
            binds.push(BindValue::Int(millis(now)));
        }
        Some(SendAtFilter::Due(now)) => {
            clauses.push("send_at_ms > 0 AND send_at_ms <= ?");
            binds.push(BindValue::Int(millis(now)));
        }
        None => {}
    }
    if let Some(method) = filter.method {
        clauses.push("method = ?");
        binds.push(BindValue::Str(method.as_str().to_string()));
    }
    if let Some(engagement) = filter.engagement {
        clauses.push(match engagement {
            EngagementFilter::Open => "opened > 0",
            EngagementFilter::Click => "clicked > 0",
            EngagementFilter::Bounce => "bounced",
            EngagementFilter::Unopen => "opened = 0",
            EngagementFilter::Unclick => "clicked = 0",
        });
    }

    if clauses.is_empty() {
        (String::new(), binds)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), binds)
    }
}

fn millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use outreach_core::types::SendMethod;

    #[test]
    fn test_scheduled_filter_clause() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let (sql, binds) = where_clause(&EmailFilter::scheduled(7, now));
        assert_eq!(
            sql,
            " WHERE created_by = ? AND is_sent = ? AND cancel = ? AND delivered = ? AND send_at_ms > ?"
        );
        assert_eq!(
            binds,
            vec![
                BindValue::Int(7),
                BindValue::Bool(true),
                BindValue::Bool(false),
                BindValue::Bool(false),
                BindValue::Int(now.timestamp_millis()),
            ]
        );
    }

    #[test]
    fn test_subject_clause_binds_twice() {
        let filter = EmailFilter {
            subject: Some("Launch".into()),
            engagement: Some(EngagementFilter::Unopen),
            ..Default::default()
        };
        let (sql, binds) = where_clause(&filter);
        assert_eq!(sql, " WHERE (subject = ? OR base_subject = ?) AND opened = 0");
        assert_eq!(binds.len(), 2);
    }

    #[test]
    fn test_empty_filter() {
        let (sql, binds) = where_clause(&EmailFilter::default());
        assert!(sql.is_empty());
        assert!(binds.is_empty());
    }

    #[test]
    fn test_row_keeps_full_record() {
        let mut email = EmailRecord::draft(3, "a@x.com", "Hello");
        email.id = 11;
        email.method = Some(SendMethod::Gmail);
        email.gmail_id = Some("g-1".into());
        let row = EmailRow::from_record(&email, 1).unwrap();
        assert_eq!(row.method, "gmail");
        assert_eq!(row.send_at_ms, 0);
        assert_eq!(row.created_day, day_string(email.created_day()));
        assert_eq!(row.into_record().unwrap(), email);
    }

    #[test]
    fn test_campaign_row_rejects_bad_day() {
        let row = CampaignRow {
            created_day: "not-a-day".into(),
            grouping_subject: "s".into(),
            base_subject: String::new(),
        };
        assert!(row.into_descriptor(1).is_none());
    }
}
