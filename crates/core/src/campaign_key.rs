//! Campaign key derivation: `owner-YYYY-MM-DD-slug(subject)`.
//!
//! Pure and deterministic so any component can invalidate a campaign's cache
//! entry without coordinating with the others.

use crate::types::{CampaignDescriptor, EmailRecord, UserId};
use chrono::NaiveDate;

/// Key for the campaign an email belongs to.
pub fn derive_key(email: &EmailRecord) -> String {
    campaign_key(email.created_by, email.created_day(), email.campaign_subject())
}

/// Key for an indexed campaign descriptor.
pub fn descriptor_key(descriptor: &CampaignDescriptor) -> String {
    campaign_key(
        descriptor.owner_id,
        descriptor.date,
        descriptor.grouping_subject(),
    )
}

pub fn campaign_key(owner: UserId, day: NaiveDate, subject: &str) -> String {
    format!("{}-{}-{}", owner, day.format("%Y-%m-%d"), slug(subject))
}

/// Lowercase, strip everything but letters/digits/whitespace, hyphenate.
pub fn slug(subject: &str) -> String {
    let cleaned: String = subject
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join("-")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn email(owner: UserId, to: &str, subject: &str, day: u32) -> EmailRecord {
        let mut email = EmailRecord::draft(owner, to, subject);
        email.created = Utc.with_ymd_and_hms(2024, 3, day, 15, 30, 0).unwrap();
        email
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("  Big News: Q3   Launch!! "), "big-news-q3-launch");
        assert_eq!(slug(""), "");
        assert_eq!(slug("Über Café"), "über-café");
    }

    #[test]
    fn test_key_format() {
        let e = email(12, "a@x.com", "Product Launch!", 9);
        assert_eq!(derive_key(&e), "12-2024-03-09-product-launch");
    }

    #[test]
    fn test_key_ignores_recipient() {
        let a = email(3, "a@x.com", "Pitch", 1);
        let b = email(3, "b@y.com", "Pitch", 1);
        assert_eq!(derive_key(&a), derive_key(&b));
    }

    #[test]
    fn test_key_differs_by_owner_day_subject() {
        let base = email(3, "a@x.com", "Pitch", 1);
        assert_ne!(derive_key(&base), derive_key(&email(4, "a@x.com", "Pitch", 1)));
        assert_ne!(derive_key(&base), derive_key(&email(3, "a@x.com", "Pitch", 2)));
        assert_ne!(derive_key(&base), derive_key(&email(3, "a@x.com", "Other", 1)));
    }

    #[test]
    fn test_base_subject_takes_precedence() {
        let mut a = email(3, "a@x.com", "Hi Anna", 1);
        let mut b = email(3, "b@x.com", "Hi Ben", 1);
        a.base_subject = "Hi {first}".into();
        b.base_subject = "Hi {first}".into();
        assert_eq!(derive_key(&a), derive_key(&b));
        assert_eq!(derive_key(&a), "3-2024-03-01-hi-first");
    }

    #[test]
    fn test_descriptor_key_matches_member_key() {
        let e = email(9, "a@x.com", "Weekly Digest", 4);
        let descriptor = CampaignDescriptor {
            owner_id: 9,
            date: e.created_day(),
            subject: "Weekly Digest".into(),
            base_subject: String::new(),
        };
        assert_eq!(descriptor_key(&descriptor), derive_key(&e));
    }
}
