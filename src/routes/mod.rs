//! HTTP routes for lookout

pub mod alerts;
pub mod guardians;
pub mod health;
pub mod safety;

pub use alerts::{handle_create_alert, handle_list_session, handle_list_unresolved, handle_resolve};
pub use guardians::{handle_guardian_connections, handle_guardian_unresolved};
pub use health::health_check;
pub use safety::{handle_activity, handle_assess, handle_emergency, handle_image};

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Incoming};
use hyper::{Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{error, warn};

use crate::types::{LookoutError, Result};

/// Largest JSON body accepted on any route
const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .header("Cache-Control", "no-store")
        .body(Full::new(Bytes::from(json)))
        .unwrap()
}

pub fn error_response(err: LookoutError) -> Response<Full<Bytes>> {
    let (status, message) = err.into_status_code_and_body();
    if status.is_server_error() {
        error!("Request failed ({}): {}", status, message);
    } else {
        warn!("Request rejected ({}): {}", status, message);
    }
    json_response(status, &ErrorResponse { error: message })
}

/// Map a handler result onto a response
pub fn respond<T: Serialize>(status: StatusCode, result: Result<T>) -> Response<Full<Bytes>> {
    match result {
        Ok(body) => json_response(status, &body),
        Err(e) => error_response(e),
    }
}

/// Read and decode a JSON request body
pub async fn read_json<T: DeserializeOwned>(req: Request<Incoming>) -> Result<T> {
    decode_body(req.into_body()).await
}

/// Collect at most `MAX_BODY_BYTES` and decode
async fn decode_body<T, B>(body: B) -> Result<T>
where
    T: DeserializeOwned,
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let body = Limited::new(body, MAX_BODY_BYTES)
        .collect()
        .await
        .map_err(|e| {
            if e.is::<LengthLimitError>() {
                LookoutError::BadRequest(format!("Body exceeds {} bytes", MAX_BODY_BYTES))
            } else {
                LookoutError::BadRequest(format!("Failed to read body: {}", e))
            }
        })?
        .to_bytes();

    Ok(serde_json::from_slice(&body)?)
}

fn default_child_age() -> u32 {
    8
}
