//! Live status endpoint
//!
//! Optional HTTP server running alongside a test so its progress can be
//! watched: `/health`, `/metrics` (JSON snapshot) and `/metrics/prometheus`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, extract::State, routing::get};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::stats::{Aggregator, MetricsSnapshot};

/// Shared state of the status routes
#[derive(Clone)]
pub struct StatusState {
    pub run_id: Uuid,
    pub aggregator: Arc<Aggregator>,
    pub started: Instant,
    pub prometheus: Option<PrometheusHandle>,
}

impl StatusState {
    pub fn new(run_id: Uuid, aggregator: Arc<Aggregator>) -> Self {
        Self {
            run_id,
            aggregator,
            started: Instant::now(),
            prometheus: None,
        }
    }

    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    run_id: Uuid,
    uptime_seconds: u64,
}

async fn health(State(state): State<StatusState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        run_id: state.run_id,
        uptime_seconds: state.started.elapsed().as_secs(),
    })
}

#[derive(Serialize)]
struct MetricsResponse {
    run_id: Uuid,
    /// Requests per second since the run started
    http_reqs_rate: f64,
    http_req_failed_rate: f64,
    checks_rate: f64,
    #[serde(flatten)]
    snapshot: MetricsSnapshot,
}

async fn metrics(State(state): State<StatusState>) -> Json<MetricsResponse> {
    let snapshot = state.aggregator.snapshot();
    Json(MetricsResponse {
        run_id: state.run_id,
        http_reqs_rate: snapshot.http_reqs_per_sec(),
        http_req_failed_rate: snapshot.failed_rate(),
        checks_rate: snapshot.checks_rate(),
        snapshot,
    })
}

async fn prometheus_metrics(State(state): State<StatusState>) -> Response {
    match state.prometheus {
        Some(ref handle) => handle.render().into_response(),
        None => (
            StatusCode::NOT_FOUND,
            "Prometheus recorder not installed",
        )
            .into_response(),
    }
}

/// Build the status router
pub fn status_routes(state: StatusState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/metrics/prometheus", get(prometheus_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the status routes on `listener` until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: StatusState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Status endpoint listening on http://{}", addr);
    }
    axum::serve(listener, status_routes(state))
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{Outcome, RequestSample};
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::util::ServiceExt;

    fn test_state() -> StatusState {
        let aggregator = Arc::new(Aggregator::new(2).unwrap());
        aggregator.record_request(
            0,
            &RequestSample::new(Outcome::Status(200), Duration::from_millis(120)),
        );
        aggregator.record_check("status equals 200", true);
        aggregator.record_iteration();
        StatusState::new(Uuid::new_v4(), aggregator)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health_endpoint_returns_ok() {
        let state = test_state();
        let run_id = state.run_id;
        let (status, json) = get_json(status_routes(state), "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["run_id"], run_id.to_string());
        assert!(json["version"].is_string());
    }

    #[tokio::test]
    async fn test_metrics_endpoint_returns_snapshot() {
        let (status, json) = get_json(status_routes(test_state()), "/metrics").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["http_reqs"], 1);
        assert_eq!(json["iterations"], 1);
        assert_eq!(json["checks"]["status equals 200"]["passes"], 1);
        assert_eq!(json["statuses"]["200"], 1);
        assert_eq!(json["http_req_duration"]["count"], 1);
        let p95 = json["http_req_duration"]["p95_ms"].as_f64().unwrap();
        assert!((p95 - 120.0).abs() < 1.0);
        assert_eq!(json["checks_rate"], 1.0);
    }

    #[tokio::test]
    async fn test_prometheus_without_recorder_is_not_found() {
        let response = status_routes(test_state())
            .oneshot(
                Request::builder()
                    .uri("/metrics/prometheus")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
