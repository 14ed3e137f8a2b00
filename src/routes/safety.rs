//! Safety entry points: message and image screening, activity updates and
//! the explicit emergency control

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::{read_json, respond};
use crate::alerts::{Alert, AlertTrigger, SessionRef};
use crate::broker::{PublishReport, PushMessage};
use crate::classifier::RiskAssessment;
use crate::server::AppState;
use crate::types::{LookoutError, Result};

#[derive(Debug, Deserialize)]
pub struct AssessRequest {
    pub session_id: String,
    pub guardian_id: String,
    pub message: String,
    #[serde(default = "super::default_child_age")]
    pub child_age: u32,
}

#[derive(Debug, Deserialize)]
pub struct ImageRequest {
    pub session_id: String,
    pub guardian_id: String,
    /// Text description produced by the external vision service
    pub description: String,
    #[serde(default = "super::default_child_age")]
    pub child_age: u32,
}

#[derive(Debug, Deserialize)]
pub struct ActivityRequest {
    pub session_id: String,
    pub guardian_id: String,
    pub activity_type: String,
    pub duration_minutes: u32,
}

#[derive(Debug, Deserialize)]
pub struct EmergencyRequest {
    pub session_id: String,
    /// Looked up from the session binding when omitted
    #[serde(default)]
    pub guardian_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AssessResponse {
    pub assessment: RiskAssessment,
    pub alert: Option<Alert>,
}

#[derive(Debug, Serialize)]
pub struct ActivityResponse {
    pub update: PublishReport,
    pub alert: Option<Alert>,
}

/// `POST /api/safety/assess`
pub async fn handle_assess(state: Arc<AppState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let result = async {
        let body: AssessRequest = read_json(req).await?;
        let session = SessionRef::new(body.session_id, body.guardian_id);
        session.validate()?;

        let assessment = state.classifier.assess(&body.message, body.child_age).await;
        raise_if_required(&state, session, assessment, body.message).await
    }
    .await;

    respond(StatusCode::OK, result)
}

/// `POST /api/safety/image`
pub async fn handle_image(state: Arc<AppState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let result = async {
        let body: ImageRequest = read_json(req).await?;
        let session = SessionRef::new(body.session_id, body.guardian_id);
        session.validate()?;

        let assessment = state
            .classifier
            .assess_image_description(&body.description, body.child_age)
            .await;
        raise_if_required(&state, session, assessment, body.description).await
    }
    .await;

    respond(StatusCode::OK, result)
}

async fn raise_if_required(
    state: &AppState,
    session: SessionRef,
    assessment: RiskAssessment,
    message: String,
) -> Result<AssessResponse> {
    if !assessment.requires_alert() {
        return Ok(AssessResponse {
            assessment,
            alert: None,
        });
    }

    let trigger = AlertTrigger::Risk {
        assessment: assessment.clone(),
        message,
    };
    let alert = state.alerts.create(session, trigger).await?;
    Ok(AssessResponse {
        assessment,
        alert: Some(alert),
    })
}

/// `POST /api/safety/activity`
pub async fn handle_activity(state: Arc<AppState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let result = async {
        let body: ActivityRequest = read_json(req).await?;
        let session = SessionRef::new(body.session_id, body.guardian_id);
        session.validate()?;

        let update = PushMessage::activity_update(&session.session_id, &body.activity_type, body.duration_minutes);
        let report = state.broker.send_update(&session.guardian_id, &update);

        let alert = state
            .alerts
            .activity_alert(session, &body.activity_type, body.duration_minutes)
            .await?;

        Ok::<_, LookoutError>(ActivityResponse {
            update: report,
            alert,
        })
    }
    .await;

    respond(StatusCode::OK, result)
}

/// `POST /api/emergency`
pub async fn handle_emergency(state: Arc<AppState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let result = async {
        let body: EmergencyRequest = read_json(req).await?;

        let guardian_id = match body.guardian_id.filter(|g| !g.trim().is_empty()) {
            Some(guardian_id) => guardian_id,
            None => state
                .alerts
                .guardian_for_session(&body.session_id)
                .await?
                .ok_or_else(|| {
                    warn!(session_id = %body.session_id, "Emergency for unbound session without guardian_id");
                    LookoutError::BadRequest("guardian_id is required for a new session".into())
                })?,
        };

        let assessment = state.classifier.assess_emergency_trigger();
        info!(
            session_id = %body.session_id,
            level = %assessment.level(),
            "Emergency control triggered"
        );

        state
            .alerts
            .create(
                SessionRef::new(body.session_id, guardian_id),
                AlertTrigger::Emergency { reason: body.reason },
            )
            .await
    }
    .await;

    respond(StatusCode::CREATED, result)
}
