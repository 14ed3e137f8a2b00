//! Error types for lookout
//!
//! Pattern adapted from doorway's gateway error enum: one flat error type
//! for the service surface, each variant carrying its HTTP mapping.

use hyper::StatusCode;

/// Main error type for lookout operations
#[derive(Debug, thiserror::Error)]
pub enum LookoutError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Alert persistence failed. Surfaced to the caller of `create`,
    /// since a genuine risk signal must never be dropped silently.
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl LookoutError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::WebSocket(_) => StatusCode::BAD_GATEWAY,
            Self::Http(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Convert to status code and body tuple for HTTP response
    pub fn into_status_code_and_body(self) -> (StatusCode, String) {
        let status = self.status_code();
        let body = self.to_string();
        (status, body)
    }
}

impl From<std::io::Error> for LookoutError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for LookoutError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for LookoutError {
    fn from(err: hyper::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for LookoutError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

impl From<rusqlite::Error> for LookoutError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<tokio::task::JoinError> for LookoutError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("Blocking task failed: {}", err))
    }
}

/// Result type alias for lookout operations
pub type Result<T> = std::result::Result<T, LookoutError>;
