//! API server: HTTP routes and the metrics exporter.

use crate::rest::{self, AppState};
use crate::{email_rest, webhook_rest};
use axum::routing::{get, post};
use axum::Router;
use outreach_core::config::AppConfig;
use std::net::SocketAddr;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Every route, bound to `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Sending
        .route("/v1/emails/bulksend", post(email_rest::handle_bulk_send))
        .route("/v1/emails/:id/send", post(email_rest::handle_send))
        .route("/v1/emails/:id/archive", post(email_rest::handle_archive))
        // Scheduling
        .route("/v1/emails/:id/cancel", post(email_rest::handle_cancel))
        .route("/v1/emails/bulkcancel", post(email_rest::handle_bulk_cancel))
        .route("/v1/emails/cancelscheduled", post(email_rest::handle_cancel_all_scheduled))
        .route("/v1/emails/scheduled", get(email_rest::handle_list_scheduled))
        .route("/v1/internal/sweep", post(webhook_rest::handle_sweep))
        // Analytics
        .route("/v1/emails/limits", get(email_rest::handle_limits))
        .route("/v1/emails/campaigns", get(email_rest::handle_campaigns))
        .route("/v1/emails/campaigns/emails", get(email_rest::handle_campaign_emails))
        // Tracking
        .route("/v1/webhooks/tracker", post(webhook_rest::handle_tracker_webhook))
        // Operational endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        .route("/api-docs/openapi.json", get(rest::openapi_json))
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct ApiServer {
    config: AppConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: AppConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Start the HTTP REST server.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let app = router(self.state.clone());
        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    }

    /// Start the metrics server on a separate port.
    pub fn start_metrics(&self) -> anyhow::Result<()> {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use outreach_core::cache::MemoryCampaignCache;
    use outreach_core::config::DeliveryConfig;
    use outreach_core::config::ProviderLimitsConfig;
    use outreach_core::event_bus::noop_notifier;
    use outreach_core::sender::SenderProfile;
    use outreach_core::types::EmailRecord;
    use outreach_delivery::{
        CampaignAggregator, ChunkPolicy, MemoryEmailStore, MemorySenderDirectory, ProviderLimits,
        SchedulingService, SendPipeline, WebhookReconciler,
    };
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tower::ServiceExt;

    fn app() -> (Router, Arc<MemoryEmailStore>) {
        let store = Arc::new(MemoryEmailStore::new());
        let notifier = noop_notifier();
        let cache = Arc::new(MemoryCampaignCache::new());
        let policy = ChunkPolicy::new(300, Duration::from_secs(5));
        let senders = Arc::new(MemorySenderDirectory::new());
        senders.upsert(SenderProfile::new(7, "me@agency.com"));

        let state = AppState {
            pipeline: Arc::new(SendPipeline::new(
                store.clone(),
                notifier.clone(),
                cache.clone(),
                &DeliveryConfig::default(),
            )),
            scheduling: Arc::new(SchedulingService::new(
                store.clone(),
                store.clone(),
                notifier.clone(),
                cache.clone(),
                policy,
            )),
            webhooks: Arc::new(WebhookReconciler::new(
                store.clone(),
                notifier.clone(),
                cache.clone(),
                policy,
            )),
            campaigns: Arc::new(CampaignAggregator::new(store.clone(), cache, 750)),
            limits: Arc::new(ProviderLimits::new(store.clone(), ProviderLimitsConfig::default())),
            senders,
            sweep_page_size: 300,
            node_id: "test-node".into(),
            start_time: Instant::now(),
        };
        (router(state), store)
    }

    fn draft(id: i64) -> EmailRecord {
        let mut e = EmailRecord::draft(7, "r@news.com", "Launch");
        e.id = id;
        e.body = "<p>hi</p>".into();
        e
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-user-id", "7");
        let body = match body {
            Some(v) => {
                builder = builder.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_send_then_conflict() {
        let (app, store) = app();
        store.seed(draft(1));

        let (status, body) = call(&app, "POST", "/v1/emails/1/send", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_sent"], json!(true));

        let (status, body) = call(&app, "POST", "/v1/emails/1/send", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], json!("state_conflict"));

        let (status, _) = call(&app, "POST", "/v1/emails/99/send", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bulk_send_partial_is_500_with_report() {
        let (app, store) = app();
        store.seed(draft(1));
        let mut sent = draft(2);
        sent.is_sent = true;
        store.seed(sent);

        let (status, body) = call(
            &app,
            "POST",
            "/v1/emails/bulksend",
            Some(json!([{"emailids": [1]}, {"emailids": [2]}])),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["has_errors"], json!(true));
        assert_eq!(body["sent"].as_array().unwrap().len(), 1);
        assert_eq!(body["skipped"][0]["id"], json!(2));
    }

    #[tokio::test]
    async fn test_webhook_reports_errors() {
        let (app, store) = app();
        let mut sent = draft(1);
        sent.is_sent = true;
        store.seed(sent);

        let (status, body) = call(
            &app,
            "POST",
            "/v1/webhooks/tracker",
            Some(json!([{"event": "open", "id": 1}, {"event": "open", "id": 404}])),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["affected_ids"], json!([1]));
        assert_eq!(store.get_sync(1).unwrap().opened, 1);
    }

    #[tokio::test]
    async fn test_requires_known_caller() {
        let (app, _) = app();
        let request = Request::builder()
            .method("GET")
            .uri("/v1/emails/scheduled")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .method("GET")
            .uri("/v1/emails/limits")
            .header("x-user-id", "8")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_health_and_openapi() {
        let (app, _) = app();
        let (status, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["node_id"], json!("test-node"));

        let (status, body) = call(&app, "GET", "/api-docs/openapi.json", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["paths"]["/v1/webhooks/tracker"].is_object());
    }
}
