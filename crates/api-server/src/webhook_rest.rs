//! Tracker webhook and the scheduling sweep hook.

use crate::rest::{batch_status, ApiError, AppState};
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use outreach_core::search::PageRequest;
use outreach_delivery::{ReconcileReport, SweepReport, TrackerEvent};
use tracing::info;

const MAX_EVENTS_PER_BATCH: usize = 5_000;

/// POST /v1/webhooks/tracker
#[utoipa::path(
    post,
    path = "/v1/webhooks/tracker",
    tag = "Webhooks",
    request_body = [TrackerEvent],
    responses(
        (status = 200, description = "Every event applied", body = ReconcileReport),
        (status = 500, description = "Some events failed; the rest were applied", body = ReconcileReport),
    )
)]
pub async fn handle_tracker_webhook(
    State(state): State<AppState>,
    Json(events): Json<Vec<TrackerEvent>>,
) -> Result<(StatusCode, Json<ReconcileReport>), ApiError> {
    if events.len() > MAX_EVENTS_PER_BATCH {
        return Err(ApiError::bad_request(format!(
            "at most {MAX_EVENTS_PER_BATCH} events per batch"
        )));
    }
    let report = state.webhooks.reconcile(&events).await?;
    Ok((batch_status(report.has_errors), Json(report)))
}

/// POST /v1/internal/sweep
#[utoipa::path(
    post,
    path = "/v1/internal/sweep",
    tag = "Scheduling",
    responses((status = 200, description = "Due scheduled sends released", body = SweepReport))
)]
pub async fn handle_sweep(State(state): State<AppState>) -> Result<Json<SweepReport>, ApiError> {
    let report = state
        .scheduling
        .release_due(PageRequest::first(state.sweep_page_size))
        .await?;
    info!(
        candidates = report.total_candidates,
        processed = report.processed,
        "Sweep triggered over HTTP"
    );
    Ok(Json(report))
}
