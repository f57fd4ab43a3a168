//! `/health` and `/metrics` HTTP surface (spec §4.8/§6), grounded on the
//! `axum` `Router`/`TcpListener::bind`/`axum::serve` pattern used for a
//! market-data-adjacent service's metrics endpoint in the pack.

use crate::health::HealthRegistry;
use crate::metrics::MetricsRegistry;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;
use tracing::info;

use crate::health::ComponentStatus;

#[derive(Clone)]
struct AppState {
    health: HealthRegistry,
    metrics: Arc<MetricsRegistry>,
}

pub fn router(health: HealthRegistry, metrics: Arc<MetricsRegistry>) -> Router {
    let state = AppState { health, metrics };
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn health_handler(axum::extract::State(state): axum::extract::State<AppState>) -> Response {
    let report = state.health.report();
    let status = match report.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(report)).into_response()
}

async fn metrics_handler(axum::extract::State(state): axum::extract::State<AppState>) -> Response {
    (StatusCode::OK, state.metrics.render()).into_response()
}

/// Bind and serve the `/health`/`/metrics` surface on `port` until the
/// process exits. Intended to be spawned as its own task by `start()`.
pub async fn serve(port: u16, health: HealthRegistry, metrics: Arc<MetricsRegistry>) -> std::io::Result<()> {
    let app = router(health, metrics);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    info!(port, "control plane HTTP surface listening");
    axum::serve(listener, app).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ComponentStatus;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_endpoint_reports_unhealthy_status_code_when_store_down() {
        let health = HealthRegistry::new();
        health.set("bus", ComponentStatus::Healthy);
        health.set("store", ComponentStatus::Unhealthy);
        let metrics = Arc::new(MetricsRegistry::new());

        let app = router(health, metrics);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_prometheus_text() {
        let health = HealthRegistry::new();
        let metrics = Arc::new(MetricsRegistry::new());
        metrics.register_counter("marketline_test_total", "test counter", vec![]);

        let app = router(health, metrics);
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
