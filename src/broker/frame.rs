//! Push channel wire format
//!
//! ## Protocol
//!
//! Connect: `ws://host:8000/ws/guardian/{guardian_id}`
//!
//! Messages (server → client):
//! - `alert` - a new guardian alert
//! - `activity_update` - progress of the child's current activity
//! - `pong` - bare text answer to a client `ping`
//!
//! Messages (client → server):
//! - `ping` - bare text keep-alive
//!
//! Heartbeat tokens are recognised before any JSON parsing.
//!
//! ```json
//! {
//!   "type": "alert",
//!   "level": "emergency",
//!   "message": "EMERGENCY: Child pressed the emergency help button",
//!   "context": null,
//!   "timestamp": "2026-03-01T12:00:00.000000Z",
//!   "requires_action": true
//! }
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::alerts::{format_timestamp, Alert, AlertLevel};

pub const PING: &str = "ping";
pub const PONG: &str = "pong";

/// Outbound unit queued for a connection's writer task
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Pre-encoded JSON push message
    Text(String),
    /// Heartbeat answer
    Pong,
    /// Ask the writer to close the socket
    Close,
}

/// Server-to-client push message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    Alert {
        level: AlertLevel,
        message: String,
        context: Option<String>,
        timestamp: String,
        requires_action: bool,
    },
    ActivityUpdate {
        session_id: String,
        activity_type: String,
        duration_minutes: u32,
        timestamp: String,
    },
}

impl PushMessage {
    /// Snapshot of a stored alert. The timestamp is the alert's `created_at`.
    pub fn from_alert(alert: &Alert) -> Self {
        Self::Alert {
            level: alert.alert_level,
            message: alert.message.clone(),
            context: alert.context.clone(),
            timestamp: format_timestamp(&alert.created_at),
            requires_action: alert.requires_action,
        }
    }

    pub fn activity_update(session_id: &str, activity_type: &str, duration_minutes: u32) -> Self {
        Self::ActivityUpdate {
            session_id: session_id.to_string(),
            activity_type: activity_type.to_string(),
            duration_minutes,
            timestamp: format_timestamp(&Utc::now()),
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Client-to-server text frame
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Ping,
    Pong,
    Other(String),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum JsonHeartbeat {
    Ping,
    Pong,
}

/// Classify an inbound text frame.
///
/// The literal tokens win over JSON; `{"type":"ping"}` is also accepted.
pub fn parse_inbound(text: &str) -> Inbound {
    match text.trim() {
        PING => return Inbound::Ping,
        PONG => return Inbound::Pong,
        _ => {}
    }

    match serde_json::from_str::<JsonHeartbeat>(text) {
        Ok(JsonHeartbeat::Ping) => Inbound::Ping,
        Ok(JsonHeartbeat::Pong) => Inbound::Pong,
        Err(_) => Inbound::Other(text.to_string()),
    }
}
