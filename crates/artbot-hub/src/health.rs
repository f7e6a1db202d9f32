use std::sync::atomic::Ordering;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::hub::HubStats;
use crate::state::AppState;

/// Structured health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub websocket_connections: usize,
    pub fleet: HubStats,
}

/// Server status, live socket count and fleet counters as JSON.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let websocket_connections = state.ws_connection_count.load(Ordering::Relaxed);
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        websocket_connections,
        fleet: state.hub.stats().await,
    })
}

pub async fn readiness_check(State(state): State<AppState>) -> &'static str {
    if state.shutdown.is_cancelled() {
        return "not ready: shutting down";
    }
    "ready"
}
