//! Outbound provider contract: submit a message, receive its provider id.

use crate::error::OutreachResult;
use crate::types::EmailRecord;
use async_trait::async_trait;
use tracing::info;

#[async_trait]
pub trait ProviderGateway: Send + Sync {
    /// Hand `email` to the provider named by its method. Returns the
    /// provider's message id when the method issues one.
    async fn submit(&self, email: &EmailRecord) -> OutreachResult<Option<String>>;
}

/// Logs instead of sending. Issues `dryrun-<id>` message ids so the rest of
/// the lifecycle (webhooks, aggregation) can be exercised locally.
pub struct DryRunGateway;

#[async_trait]
impl ProviderGateway for DryRunGateway {
    async fn submit(&self, email: &EmailRecord) -> OutreachResult<Option<String>> {
        let method = email.method.unwrap_or_default();
        info!(
            email_id = email.id,
            method = %method,
            to = %email.to,
            "Dry-run provider submission"
        );
        Ok(method
            .has_provider_id_field()
            .then(|| format!("dryrun-{}", email.id)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::SendMethod;

    #[tokio::test]
    async fn test_dry_run_ids_follow_method() {
        let mut email = EmailRecord::draft(1, "a@x.com", "s");
        email.id = 8;
        email.method = Some(SendMethod::SendGrid);
        assert_eq!(DryRunGateway.submit(&email).await.unwrap().as_deref(), Some("dryrun-8"));
        email.method = Some(SendMethod::Outlook);
        assert_eq!(DryRunGateway.submit(&email).await.unwrap(), None);
    }
}
