//! Shared handler state, error mapping, caller resolution and the
//! operational endpoints.

use crate::swagger::ApiDoc;
use axum::async_trait;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use outreach_core::error::OutreachError;
use outreach_core::sender::{SenderDirectory, SenderProfile};
use outreach_delivery::{
    CampaignAggregator, DeliveryError, ErrorKind, ProviderLimits, SchedulingService, SendPipeline,
    WebhookReconciler,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, warn};
use utoipa::{OpenApi, ToSchema};

/// Header carrying the authenticated user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<SendPipeline>,
    pub scheduling: Arc<SchedulingService>,
    pub webhooks: Arc<WebhookReconciler>,
    pub campaigns: Arc<CampaignAggregator>,
    pub limits: Arc<ProviderLimits>,
    pub senders: Arc<dyn SenderDirectory>,
    pub sweep_page_size: usize,
    pub node_id: String,
    pub start_time: Instant,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
}

/// Error half of every handler result.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl ApiError {
    pub fn new(status: StatusCode, error: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                error: error.to_string(),
                message: message.into(),
            },
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", message)
    }
}

impl From<DeliveryError> for ApiError {
    fn from(e: DeliveryError) -> Self {
        let (status, code) = match e.kind() {
            ErrorKind::Validation => (StatusCode::BAD_REQUEST, "validation_failed"),
            ErrorKind::Conflict => (StatusCode::CONFLICT, "state_conflict"),
            ErrorKind::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            ErrorKind::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
            ErrorKind::Infrastructure => {
                error!(error = %e, "Request failed on infrastructure error");
                (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
            }
        };
        Self::new(status, code, e.to_string())
    }
}

impl From<OutreachError> for ApiError {
    fn from(e: OutreachError) -> Self {
        DeliveryError::from(e).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        metrics::counter!("outreach_api_errors_total", "status" => self.status.as_str().to_string())
            .increment(1);
        (self.status, Json(self.body)).into_response()
    }
}

/// 500 with the partial report when a batch had errors, else 200.
pub fn batch_status(has_errors: bool) -> StatusCode {
    if has_errors {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    }
}

/// The authenticated sender behind a request.
pub struct Caller(pub SenderProfile);

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
            .ok_or_else(|| {
                ApiError::new(StatusCode::UNAUTHORIZED, "unauthenticated", "missing or invalid x-user-id")
            })?;

        match state.senders.sender(user_id).await? {
            Some(profile) => Ok(Caller(profile)),
            None => {
                warn!(user_id, "Request from unknown user");
                Err(ApiError::new(StatusCode::FORBIDDEN, "forbidden", "unknown user"))
            }
        }
    }
}

/// GET /health
#[utoipa::path(
    get,
    path = "/health",
    tag = "Operations",
    responses((status = 200, description = "Service is healthy", body = HealthResponse))
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ready
#[utoipa::path(
    get,
    path = "/ready",
    tag = "Operations",
    responses((status = 200, description = "Ready to accept traffic"))
)]
pub async fn readiness() -> StatusCode {
    StatusCode::OK
}

/// GET /live
#[utoipa::path(
    get,
    path = "/live",
    tag = "Operations",
    responses((status = 200, description = "Process is alive"))
)]
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// GET /api-docs/openapi.json
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
