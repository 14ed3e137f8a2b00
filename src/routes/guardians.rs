//! Guardian-scoped queries: fallback poll and presence

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use super::respond;
use crate::broker::ConnectionInfo;
use crate::server::AppState;

#[derive(Serialize)]
struct ConnectionsResponse {
    guardian_id: String,
    count: usize,
    connections: Vec<ConnectionInfo>,
}

/// `GET /api/guardians/{guardian_id}/alerts/unresolved`
pub async fn handle_guardian_unresolved(state: Arc<AppState>, guardian_id: &str) -> Response<Full<Bytes>> {
    respond(
        StatusCode::OK,
        state.alerts.list_unresolved_for_guardian(guardian_id).await,
    )
}

/// `GET /api/guardians/{guardian_id}/connections`
pub fn handle_guardian_connections(state: Arc<AppState>, guardian_id: &str) -> Response<Full<Bytes>> {
    let connections = state.broker.connections_for(guardian_id);
    let body = ConnectionsResponse {
        guardian_id: guardian_id.to_string(),
        count: connections.len(),
        connections,
    };
    respond(StatusCode::OK, Ok(body))
}
