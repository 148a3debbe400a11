use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::metrics::encode_metrics;
use crate::status::{StatusReporter, StatusSnapshot};

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub feed: String,
    pub connected: bool,
    pub last_event_epoch_secs: u64,
}

/// Shared state for health endpoints
#[derive(Clone)]
pub struct ServerState {
    pub feed_name: String,
    pub connected: Arc<AtomicBool>,
    pub last_event: Arc<AtomicU64>,
    pub reporter: Arc<StatusReporter>,
}

impl ServerState {
    pub fn new(
        feed_name: impl Into<String>,
        connected: Arc<AtomicBool>,
        last_event: Arc<AtomicU64>,
        reporter: Arc<StatusReporter>,
    ) -> Self {
        Self {
            feed_name: feed_name.into(),
            connected,
            last_event,
            reporter,
        }
    }

    fn health(&self, status: &str) -> HealthResponse {
        HealthResponse {
            status: status.to_string(),
            feed: self.feed_name.clone(),
            connected: self.connected.load(Ordering::SeqCst),
            last_event_epoch_secs: self.last_event.load(Ordering::SeqCst),
        }
    }
}

/// Health endpoint - always returns 200 if server is running
async fn health(State(state): State<ServerState>) -> Json<HealthResponse> {
    Json(state.health("ok"))
}

/// Ready endpoint - returns 200 only when connected
async fn ready(State(state): State<ServerState>) -> (StatusCode, Json<HealthResponse>) {
    if state.connected.load(Ordering::SeqCst) {
        (StatusCode::OK, Json(state.health("ready")))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(state.health("not_ready")))
    }
}

/// Prometheus text exposition
async fn metrics() -> impl IntoResponse {
    match encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            e.to_string(),
        ),
    }
}

/// Current counters and catalog inventory
async fn status(State(state): State<ServerState>) -> Json<StatusSnapshot> {
    Json(state.reporter.snapshot().await)
}

/// Create the health server router
pub fn create_router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .route("/status", get(status))
        .with_state(state)
}

/// Run the health server
pub async fn run_server(addr: SocketAddr, state: ServerState) -> std::io::Result<()> {
    let app = create_router(state);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::CounterTable;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use mdbridge_catalog::InMemoryCatalog;
    use mdbridge_model::Category;
    use tower::ServiceExt;

    fn create_test_state(connected: bool) -> ServerState {
        let counters = Arc::new(CounterTable::new());
        counters.record(Category::Quote, "ADAUSDT-PERP.BINANCE");
        let reporter = Arc::new(StatusReporter::new(
            "test-feed",
            counters,
            Arc::new(InMemoryCatalog::new()),
        ));
        ServerState::new(
            "test-feed",
            Arc::new(AtomicBool::new(connected)),
            Arc::new(AtomicU64::new(0)),
            reporter,
        )
    }

    async fn get_path(state: ServerState, path: &str) -> axum::response::Response {
        create_router(state)
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_returns_ok() {
        let response = get_path(create_test_state(false), "/health").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_when_connected() {
        let response = get_path(create_test_state(true), "/ready").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_when_disconnected() {
        let response = get_path(create_test_state(false), "/ready").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let response = get_path(create_test_state(true), "/metrics").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_status_endpoint_returns_snapshot() {
        let response = get_path(create_test_state(true), "/status").await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["feed"], "test-feed");
        assert_eq!(json["counters"][0]["key"], "ADAUSDT-PERP.BINANCE");
        assert_eq!(json["inventory"]["status"], "available");
    }
}
