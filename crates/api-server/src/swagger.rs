//! OpenAPI document.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Outreach Email API",
        version = "0.1.0",
        description = "Email send pipeline, scheduling, tracking webhooks and campaign analytics.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Emails", description = "Sending and archiving emails"),
        (name = "Scheduling", description = "Scheduled sends and cancellation"),
        (name = "Campaigns", description = "Per-campaign delivery analytics"),
        (name = "Webhooks", description = "Tracker and provider events"),
        (name = "Operations", description = "Health, readiness, and liveness probes"),
    ),
    paths(
        crate::email_rest::handle_send,
        crate::email_rest::handle_bulk_send,
        crate::email_rest::handle_cancel,
        crate::email_rest::handle_bulk_cancel,
        crate::email_rest::handle_cancel_all_scheduled,
        crate::email_rest::handle_archive,
        crate::email_rest::handle_list_scheduled,
        crate::email_rest::handle_limits,
        crate::email_rest::handle_campaigns,
        crate::email_rest::handle_campaign_emails,
        crate::webhook_rest::handle_tracker_webhook,
        crate::webhook_rest::handle_sweep,
        crate::rest::health_check,
        crate::rest::readiness,
        crate::rest::liveness,
    ),
    components(schemas(
        outreach_core::types::EmailRecord,
        outreach_core::types::SendMethod,
        outreach_core::types::CampaignStats,
        outreach_core::types::ProviderUsage,
        outreach_core::search::EngagementFilter,
        outreach_delivery::BulkSendOutcome,
        outreach_delivery::BulkCancelOutcome,
        outreach_delivery::SkippedEmail,
        outreach_delivery::ChunkFailure,
        outreach_delivery::SweepReport,
        outreach_delivery::ReconcileReport,
        outreach_delivery::TrackerEvent,
        outreach_delivery::webhook::LooseId,
        outreach_delivery::webhook::EventFailure,
        crate::email_rest::EmailIdsBody,
        crate::email_rest::EmailPage,
        crate::email_rest::CampaignPage,
        crate::rest::ErrorResponse,
        crate::rest::HealthResponse,
    ))
)]
pub struct ApiDoc;
