//! Tracking payload: click-redirect rewriting and the open pixel.

use outreach_core::types::EmailId;
use regex::{Captures, Regex};
use std::sync::LazyLock;

static ANCHOR_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(<a\b[^>]*?\bhref\s*=\s*)(?:"([^"]*)"|'([^']*)')"#)
        .expect("anchor href pattern is valid")
});

#[derive(Debug, Clone)]
pub struct TrackingRewriter {
    click_redirect_url: String,
    pixel_url: String,
}

impl TrackingRewriter {
    pub fn new(click_redirect_url: impl Into<String>, pixel_url: impl Into<String>) -> Self {
        Self {
            click_redirect_url: click_redirect_url.into(),
            pixel_url: pixel_url.into(),
        }
    }

    fn tracked_link(&self, email_id: EmailId, target: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(target.as_bytes()).collect();
        format!("{}?id={}&url={}", self.click_redirect_url, email_id, encoded)
    }

    fn is_trackable(&self, target: &str) -> bool {
        let lower = target.trim().to_ascii_lowercase();
        !(lower.is_empty()
            || lower.starts_with('#')
            || lower.starts_with("mailto:")
            || lower.starts_with("tel:")
            || target.starts_with(&self.click_redirect_url))
    }

    /// Route every trackable anchor through the click redirector.
    pub fn rewrite_links(&self, body: &str, email_id: EmailId) -> String {
        ANCHOR_HREF
            .replace_all(body, |caps: &Captures| {
                let prefix = &caps[1];
                let target = caps
                    .get(2)
                    .or_else(|| caps.get(3))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                if self.is_trackable(target) {
                    format!("{prefix}\"{}\"", self.tracked_link(email_id, target))
                } else {
                    caps[0].to_string()
                }
            })
            .into_owned()
    }

    pub fn pixel(&self, email_id: EmailId) -> String {
        format!(
            "<img src=\"{}?id={}\" alt=\"\" width=\"1\" height=\"1\" />",
            self.pixel_url, email_id
        )
    }

    /// Rewrite links and append the pixel.
    pub fn apply(&self, body: &str, email_id: EmailId) -> String {
        let mut tracked = self.rewrite_links(body, email_id);
        tracked.push_str(&self.pixel(email_id));
        tracked
    }
}
