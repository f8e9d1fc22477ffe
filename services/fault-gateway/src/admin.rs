//! Status and admin HTTP facade
//!
//! Runs on its own listener (default 127.0.0.1:9090) and only reads
//! orchestrator state, apart from the explicit event-log clear.
//!
//! Endpoints:
//! - GET  /health              - 200 healthy, 503 degraded/unhealthy
//! - GET  /status              - full status report
//! - GET  /events/stats        - event log line count and size
//! - POST /admin/events/clear  - truncate the event log
//! - GET  /metrics             - Prometheus exposition

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::{info, warn};

use crate::orchestrator::{Health, Orchestrator};

/// Maximum admin requests served concurrently; excess requests queue.
const MAX_CONCURRENT_REQUESTS: usize = 64;

/// Shared state for admin handlers.
#[derive(Clone)]
pub struct AdminState {
    orchestrator: Arc<Orchestrator>,
    prometheus: PrometheusHandle,
}

impl AdminState {
    pub fn new(orchestrator: Arc<Orchestrator>, prometheus: PrometheusHandle) -> Self {
        Self {
            orchestrator,
            prometheus,
        }
    }
}

/// Build the admin axum router.
pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/events/stats", get(event_stats))
        .route("/admin/events/clear", post(clear_events))
        .route("/metrics", get(metrics))
        .layer(tower::limit::ConcurrencyLimitLayer::new(MAX_CONCURRENT_REQUESTS))
        .with_state(state)
}

fn json_response(status: StatusCode, body: serde_json::Value) -> impl IntoResponse {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// GET /health - summary suitable for a liveness/readiness probe.
async fn health(State(state): State<AdminState>) -> impl IntoResponse {
    let report = state.orchestrator.status();
    let code = match report.status {
        Health::Healthy => StatusCode::OK,
        Health::Degraded | Health::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    json_response(
        code,
        serde_json::json!({
            "status": report.status,
            "token_valid": report.token.valid,
            "subscription_expired": report.subscription.expired,
            "consumer": report.consumer.state,
            "uptime_seconds": report.uptime_seconds,
        }),
    )
}

async fn status(State(state): State<AdminState>) -> impl IntoResponse {
    let report = state.orchestrator.status();
    let body = serde_json::to_value(&report).unwrap_or_else(|e| {
        serde_json::json!({ "error": format!("status serialization failed: {e}") })
    });
    json_response(StatusCode::OK, body)
}

/// GET /events/stats - introspection only, never touches the log contents.
async fn event_stats(State(state): State<AdminState>) -> impl IntoResponse {
    let sink = state.orchestrator.sink();
    match tokio::try_join!(sink.count(), sink.size_bytes()) {
        Ok((count, size_bytes)) => json_response(
            StatusCode::OK,
            serde_json::json!({
                "path": sink.path().display().to_string(),
                "count": count,
                "size_bytes": size_bytes,
            }),
        ),
        Err(e) => {
            warn!(error = %e, "event log stats unavailable");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": e.to_string() }),
            )
        }
    }
}

/// POST /admin/events/clear - operator-invoked truncation.
async fn clear_events(State(state): State<AdminState>) -> impl IntoResponse {
    match state.orchestrator.sink().clear().await {
        Ok(()) => {
            info!("event log cleared via admin API");
            json_response(StatusCode::OK, serde_json::json!({ "cleared": true }))
        }
        Err(e) => {
            warn!(error = %e, "event log clear failed");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": e.to_string() }),
            )
        }
    }
}

/// Prometheus metrics endpoint, text exposition format.
async fn metrics(State(state): State<AdminState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}
