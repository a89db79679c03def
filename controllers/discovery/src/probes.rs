//! Health, readiness and metrics endpoints.
//!
//! - `GET /healthz`: liveness, always 200
//! - `GET /readyz`: 200 once the informer caches have synced, 503 before
//! - `GET /metrics`: Prometheus text format

use crate::error::ControllerError;
use crate::metrics::Metrics;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tower_http::trace::TraceLayer;
use tracing::info;

/// State shared between the controller and the probe handlers.
#[derive(Clone)]
pub struct ProbeState {
    ready: Arc<AtomicBool>,
    metrics: Metrics,
}

impl ProbeState {
    pub fn new(metrics: Metrics) -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(false)),
            metrics,
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
}

/// GET /healthz
async fn healthz() -> impl IntoResponse {
    Json(StatusResponse { status: "ok" })
}

/// GET /readyz
async fn readyz(State(state): State<ProbeState>) -> impl IntoResponse {
    if state.is_ready() {
        (StatusCode::OK, Json(StatusResponse { status: "ready" }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(StatusResponse {
                status: "waiting for caches to sync",
            }),
        )
    }
}

/// GET /metrics
async fn metrics(State(state): State<ProbeState>) -> impl IntoResponse {
    let families = state.metrics.registry().gather();
    match prometheus::TextEncoder::new().encode_to_string(&families) {
        Ok(text) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            text,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            e.to_string(),
        ),
    }
}

pub fn router(state: ProbeState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the probe endpoints until the task is dropped.
pub async fn serve(addr: SocketAddr, state: ProbeState) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(ControllerError::Probe)?;
    info!("Probe server listening on {}", addr);
    axum::serve(listener, router(state)).await.map_err(ControllerError::Probe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    fn state() -> ProbeState {
        ProbeState::new(Metrics::new("logConfig").expect("valid metrics"))
    }

    async fn get_path(state: ProbeState, path: &str) -> (StatusCode, String) {
        let response = router(state)
            .oneshot(Request::builder().uri(path).body(Body::empty()).expect("valid request"))
            .await
            .expect("router is infallible");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("readable body");
        (status, String::from_utf8(body.to_vec()).expect("utf-8 body"))
    }

    #[tokio::test]
    async fn test_healthz() {
        let (status, body) = get_path(state(), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).expect("json body");
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_readyz_follows_sync_state() {
        let state = state();
        let (status, _) = get_path(state.clone(), "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        state.set_ready(true);
        let (status, body) = get_path(state, "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("ready"));
    }

    #[tokio::test]
    async fn test_metrics_exposes_queue_series() {
        let state = state();
        state.metrics.set_depth(2);
        let (status, body) = get_path(state, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("workqueue_depth{name=\"logConfig\"} 2"));
    }

    #[tokio::test]
    async fn test_unknown_path() {
        let (status, _) = get_path(state(), "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
