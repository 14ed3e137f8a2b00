//! Liveness probe with connection and queue statistics

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use super::json_response;
use crate::server::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: &'static str,
    /// Uptime in seconds
    pub uptime: u64,
    pub timestamp: String,
    /// Live guardian push connections
    pub connections: usize,
    /// Guardians with at least one live connection
    pub guardians: usize,
    /// Alerts waiting for the dispatcher
    pub pending_notifications: usize,
    /// Unresolved alerts in the store (null if the store is unreachable)
    pub unresolved_alerts: Option<u64>,
    pub semantic_enabled: bool,
}

pub async fn health_check(state: Arc<AppState>) -> Response<Full<Bytes>> {
    let unresolved_alerts = state.alerts.unresolved_count().await.ok();

    let response = HealthResponse {
        healthy: unresolved_alerts.is_some(),
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        connections: state.broker.total_connections(),
        guardians: state.broker.guardian_count(),
        pending_notifications: state.alerts.pending_notifications(),
        unresolved_alerts,
        semantic_enabled: state.args.semantic_enabled(),
    };

    let status = if response.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    json_response(status, &response)
}
