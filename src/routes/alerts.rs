//! Alert history, manual creation and resolution

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;

use super::{error_response, read_json, respond};
use crate::alerts::{Alert, AlertLevel, AlertTrigger, SessionRef};
use crate::server::AppState;
use crate::types::{LookoutError, Result};

#[derive(Debug, Deserialize)]
pub struct CreateAlertRequest {
    pub session_id: String,
    pub guardian_id: String,
    pub alert_level: AlertLevel,
    pub message: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub assessment_detail: Option<String>,
}

/// `POST /api/alerts`
pub async fn handle_create_alert(state: Arc<AppState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let result = async {
        let body: CreateAlertRequest = read_json(req).await?;
        let trigger = AlertTrigger::Manual {
            level: body.alert_level,
            message: body.message,
            context: body.context,
            assessment_detail: body.assessment_detail,
        };
        state
            .alerts
            .create(SessionRef::new(body.session_id, body.guardian_id), trigger)
            .await
    }
    .await;

    respond(StatusCode::CREATED, result)
}

/// `GET /api/alerts/{session_id}`
pub async fn handle_list_session(state: Arc<AppState>, session_id: &str) -> Response<Full<Bytes>> {
    respond(StatusCode::OK, state.alerts.list_for_session(session_id).await)
}

/// `GET /api/alerts/{session_id}/unresolved`
pub async fn handle_list_unresolved(state: Arc<AppState>, session_id: &str) -> Response<Full<Bytes>> {
    respond(StatusCode::OK, state.alerts.list_unresolved(session_id).await)
}

/// `PUT /api/alerts/{alert_id}/resolve`
pub async fn handle_resolve(state: Arc<AppState>, alert_id: &str) -> Response<Full<Bytes>> {
    let id = match parse_alert_id(alert_id) {
        Ok(id) => id,
        Err(e) => return error_response(e),
    };
    let result: Result<Alert> = state.alerts.resolve(id).await;
    respond(StatusCode::OK, result)
}

fn parse_alert_id(raw: &str) -> Result<i64> {
    raw.parse::<i64>()
        .map_err(|_| LookoutError::BadRequest(format!("invalid alert id: {}", raw)))
}
