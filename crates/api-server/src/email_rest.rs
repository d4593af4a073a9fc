//! Email send, scheduling and campaign endpoints.

use crate::rest::{batch_status, ApiError, AppState, Caller, ErrorResponse};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{NaiveDate, Utc};
use outreach_core::search::{EngagementFilter, PageRequest};
use outreach_core::types::{CampaignStats, EmailId, EmailRecord, ProviderUsage};
use outreach_delivery::{BulkCancelOutcome, BulkSendOutcome};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

const DEFAULT_PAGE_LIMIT: usize = 20;
const MAX_PAGE_LIMIT: usize = 100;
const MAX_BULK_IDS: usize = 10_000;

/// `{"emailids": [...]}`; `emailIds` and `emails` are accepted as well.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct EmailIdsBody {
    #[serde(rename = "emailids", alias = "emailIds", alias = "emails", default)]
    pub email_ids: Vec<EmailId>,
}

/// Bulk bodies arrive either as one object or as an array of objects.
#[derive(Debug, Clone)]
pub enum BulkIdsRequest {
    One(EmailIdsBody),
    Many(Vec<EmailIdsBody>),
}

impl BulkIdsRequest {
    /// Pick the shape from the JSON value itself.
    pub fn from_value(value: Value) -> Result<Self, ApiError> {
        let parsed = match value {
            Value::Array(_) => serde_json::from_value(value).map(BulkIdsRequest::Many),
            Value::Object(_) => serde_json::from_value(value).map(BulkIdsRequest::One),
            _ => return Err(ApiError::bad_request("expected an object or an array of objects")),
        };
        parsed.map_err(|e| ApiError::bad_request(e.to_string()))
    }

    /// Every id in request order, first occurrence kept.
    pub fn into_ids(self) -> Vec<EmailId> {
        let bodies = match self {
            BulkIdsRequest::One(body) => vec![body],
            BulkIdsRequest::Many(bodies) => bodies,
        };
        let mut seen = BTreeSet::new();
        bodies
            .into_iter()
            .flat_map(|b| b.email_ids)
            .filter(|id| seen.insert(*id))
            .collect()
    }
}

fn bulk_ids(value: Value) -> Result<Vec<EmailId>, ApiError> {
    let ids = BulkIdsRequest::from_value(value)?.into_ids();
    if ids.is_empty() {
        return Err(ApiError::bad_request("no email ids given"));
    }
    if ids.len() > MAX_BULK_IDS {
        return Err(ApiError::bad_request(format!(
            "at most {MAX_BULK_IDS} email ids per request"
        )));
    }
    Ok(ids)
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageQuery {
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl PageQuery {
    fn page(&self) -> PageRequest {
        PageRequest::new(
            self.offset.unwrap_or(0),
            self.limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
        )
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CampaignListQuery {
    /// Only campaigns on or after this day (YYYY-MM-DD).
    pub since: Option<NaiveDate>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
#[serde(rename_all = "camelCase")]
pub struct CampaignEmailsQuery {
    pub date: NaiveDate,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub base_subject: String,
    pub filter: Option<EngagementFilter>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EmailPage {
    pub items: Vec<EmailRecord>,
    pub total: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CampaignPage {
    pub items: Vec<CampaignStats>,
    pub total: usize,
}

/// POST /v1/emails/{id}/send
#[utoipa::path(
    post,
    path = "/v1/emails/{id}/send",
    tag = "Emails",
    params(("id" = i64, Path, description = "Email id")),
    responses(
        (status = 200, description = "Email committed for sending", body = EmailRecord),
        (status = 400, description = "Content or sender rejected", body = ErrorResponse),
        (status = 409, description = "Email already sent", body = ErrorResponse),
    )
)]
pub async fn handle_send(
    State(state): State<AppState>,
    Caller(sender): Caller,
    Path(id): Path<EmailId>,
) -> Result<Json<EmailRecord>, ApiError> {
    Ok(Json(state.pipeline.send_single(&sender, id).await?))
}

/// POST /v1/emails/bulksend
#[utoipa::path(
    post,
    path = "/v1/emails/bulksend",
    tag = "Emails",
    request_body = EmailIdsBody,
    responses(
        (status = 200, description = "Every email committed", body = BulkSendOutcome),
        (status = 500, description = "Partial send; body lists what failed", body = BulkSendOutcome),
    )
)]
pub async fn handle_bulk_send(
    State(state): State<AppState>,
    Caller(sender): Caller,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<BulkSendOutcome>), ApiError> {
    let ids = bulk_ids(body)?;
    let outcome = state.pipeline.bulk_send(&sender, &ids).await?;
    Ok((batch_status(outcome.has_errors), Json(outcome)))
}

/// POST /v1/emails/{id}/cancel
#[utoipa::path(
    post,
    path = "/v1/emails/{id}/cancel",
    tag = "Scheduling",
    params(("id" = i64, Path, description = "Email id")),
    responses(
        (status = 200, description = "Scheduled send cancelled", body = EmailRecord),
        (status = 409, description = "Already delivered or not scheduled", body = ErrorResponse),
    )
)]
pub async fn handle_cancel(
    State(state): State<AppState>,
    Caller(sender): Caller,
    Path(id): Path<EmailId>,
) -> Result<Json<EmailRecord>, ApiError> {
    Ok(Json(state.scheduling.cancel(&sender, id).await?))
}

/// POST /v1/emails/bulkcancel
#[utoipa::path(
    post,
    path = "/v1/emails/bulkcancel",
    tag = "Scheduling",
    request_body = EmailIdsBody,
    responses(
        (status = 200, description = "Every email cancelled", body = BulkCancelOutcome),
        (status = 500, description = "Partial cancel", body = BulkCancelOutcome),
    )
)]
pub async fn handle_bulk_cancel(
    State(state): State<AppState>,
    Caller(sender): Caller,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<BulkCancelOutcome>), ApiError> {
    let ids = bulk_ids(body)?;
    let outcome = state.scheduling.bulk_cancel(&sender, &ids).await?;
    Ok((batch_status(outcome.has_errors), Json(outcome)))
}

/// POST /v1/emails/cancelscheduled
#[utoipa::path(
    post,
    path = "/v1/emails/cancelscheduled",
    tag = "Scheduling",
    responses(
        (status = 200, description = "All pending sends cancelled", body = BulkCancelOutcome),
        (status = 500, description = "Partial cancel", body = BulkCancelOutcome),
    )
)]
pub async fn handle_cancel_all_scheduled(
    State(state): State<AppState>,
    Caller(sender): Caller,
) -> Result<(StatusCode, Json<BulkCancelOutcome>), ApiError> {
    let outcome = state.scheduling.cancel_all_scheduled(&sender).await?;
    info!(user_id = sender.user_id, cancelled = outcome.cancelled.len(), "Cancelled all scheduled emails");
    Ok((batch_status(outcome.has_errors), Json(outcome)))
}

/// POST /v1/emails/{id}/archive
#[utoipa::path(
    post,
    path = "/v1/emails/{id}/archive",
    tag = "Emails",
    params(("id" = i64, Path, description = "Email id")),
    responses((status = 200, description = "Email archived", body = EmailRecord))
)]
pub async fn handle_archive(
    State(state): State<AppState>,
    Caller(sender): Caller,
    Path(id): Path<EmailId>,
) -> Result<Json<EmailRecord>, ApiError> {
    Ok(Json(state.scheduling.archive(&sender, id).await?))
}

/// GET /v1/emails/scheduled
#[utoipa::path(
    get,
    path = "/v1/emails/scheduled",
    tag = "Scheduling",
    params(PageQuery),
    responses((status = 200, description = "Pending scheduled sends", body = EmailPage))
)]
pub async fn handle_list_scheduled(
    State(state): State<AppState>,
    Caller(sender): Caller,
    Query(query): Query<PageQuery>,
) -> Result<Json<EmailPage>, ApiError> {
    let page = state.scheduling.list_scheduled(&sender, query.page()).await?;
    Ok(Json(EmailPage {
        items: page.items,
        total: page.total,
    }))
}

/// GET /v1/emails/limits
#[utoipa::path(
    get,
    path = "/v1/emails/limits",
    tag = "Emails",
    responses((status = 200, description = "Today's usage per provider", body = [ProviderUsage]))
)]
pub async fn handle_limits(
    State(state): State<AppState>,
    Caller(sender): Caller,
) -> Result<Json<Vec<ProviderUsage>>, ApiError> {
    Ok(Json(state.limits.usage(sender.user_id, Utc::now()).await?))
}

/// GET /v1/emails/campaigns
#[utoipa::path(
    get,
    path = "/v1/emails/campaigns",
    tag = "Campaigns",
    params(CampaignListQuery),
    responses((status = 200, description = "Campaigns, newest first", body = CampaignPage))
)]
pub async fn handle_campaigns(
    State(state): State<AppState>,
    Caller(sender): Caller,
    Query(query): Query<CampaignListQuery>,
) -> Result<Json<CampaignPage>, ApiError> {
    let page = PageQuery {
        offset: query.offset,
        limit: query.limit,
    }
    .page();
    let campaigns = state
        .campaigns
        .list_campaigns(sender.user_id, query.since, page)
        .await?;
    Ok(Json(CampaignPage {
        items: campaigns.items,
        total: campaigns.total,
    }))
}

/// GET /v1/emails/campaigns/emails
#[utoipa::path(
    get,
    path = "/v1/emails/campaigns/emails",
    tag = "Campaigns",
    params(CampaignEmailsQuery),
    responses((status = 200, description = "Members of one campaign", body = EmailPage))
)]
pub async fn handle_campaign_emails(
    State(state): State<AppState>,
    Caller(sender): Caller,
    Query(query): Query<CampaignEmailsQuery>,
) -> Result<Json<EmailPage>, ApiError> {
    if query.subject.is_empty() && query.base_subject.is_empty() {
        return Err(ApiError::bad_request("subject or baseSubject is required"));
    }
    let page = PageQuery {
        offset: query.offset,
        limit: query.limit,
    }
    .page();
    let emails = state
        .campaigns
        .campaign_emails(
            sender.user_id,
            query.date,
            &query.subject,
            &query.base_subject,
            query.filter,
            page,
        )
        .await?;
    Ok(Json(EmailPage {
        items: emails.items,
        total: emails.total,
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bulk_body_shapes() {
        let one = bulk_ids(json!({"emailids": [3, 1, 3]})).unwrap();
        assert_eq!(one, vec![3, 1]);

        let many = bulk_ids(json!([{"emailIds": [1, 2]}, {"emails": [2, 5]}])).unwrap();
        assert_eq!(many, vec![1, 2, 5]);

        assert_eq!(bulk_ids(json!("1,2")).unwrap_err().status, StatusCode::BAD_REQUEST);
        assert_eq!(bulk_ids(json!({"emailids": []})).unwrap_err().status, StatusCode::BAD_REQUEST);
        assert!(bulk_ids(json!({"emailids": ["x"]})).is_err());
    }

    #[test]
    fn test_page_query_clamps() {
        let q = PageQuery {
            offset: Some(40),
            limit: Some(10_000),
        };
        assert_eq!(q.page(), PageRequest::new(40, MAX_PAGE_LIMIT));
        let default = PageQuery {
            offset: None,
            limit: None,
        };
        assert_eq!(default.page(), PageRequest::new(0, DEFAULT_PAGE_LIMIT));
    }
}
