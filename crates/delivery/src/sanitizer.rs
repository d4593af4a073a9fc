//! Default HTML safety check for outgoing bodies.

use outreach_core::sender::HtmlSanitizer;
use regex::Regex;
use std::sync::LazyLock;

static SCRIPT_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<\s*(script|iframe|object|embed)\b").expect("tag pattern is valid"));
static EVENT_HANDLER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<[^>]*\son[a-z]+\s*=").expect("handler pattern is valid"));
static SCRIPT_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(href|src)\s*=\s*["']?\s*javascript:"#).expect("url pattern is valid")
});

/// Rejects active content: script-like tags, inline event handlers and
/// `javascript:` URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicHtmlSanitizer;

impl HtmlSanitizer for BasicHtmlSanitizer {
    fn validate(&self, html: &str) -> Result<(), String> {
        if let Some(m) = SCRIPT_TAG.captures(html).and_then(|c| c.get(1)) {
            return Err(format!("<{}> elements are not allowed", m.as_str().to_ascii_lowercase()));
        }
        if EVENT_HANDLER.is_match(html) {
            return Err("inline event handlers are not allowed".to_string());
        }
        if SCRIPT_URL.is_match(html) {
            return Err("javascript: URLs are not allowed".to_string());
        }
        Ok(())
    }
}

/// Accepts every body.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllSanitizer;

impl HtmlSanitizer for AllowAllSanitizer {
    fn validate(&self, _html: &str) -> Result<(), String> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_markup() {
        let html = r#"<p style="color:red">Hi <a href="https://x.com">there</a><img src="a.png"></p>"#;
        assert!(BasicHtmlSanitizer.validate(html).is_ok());
        assert!(BasicHtmlSanitizer.validate("").is_ok());
    }

    #[test]
    fn test_rejects_active_content() {
        assert_eq!(
            BasicHtmlSanitizer.validate("<p>x</p><SCRIPT>alert(1)</SCRIPT>").unwrap_err(),
            "<script> elements are not allowed"
        );
        assert!(BasicHtmlSanitizer.validate(r#"<img src="a.png" onerror="x()">"#).is_err());
        assert!(BasicHtmlSanitizer.validate(r#"<a href="javascript:void(0)">x</a>"#).is_err());
    }

    #[test]
    fn test_text_mentioning_on_is_fine() {
        assert!(BasicHtmlSanitizer.validate("<p>Click on = here</p>").is_ok());
    }
}
