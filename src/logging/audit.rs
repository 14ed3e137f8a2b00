//! Safety audit trail
//!
//! Every created alert is logged with structured fields so the trail can
//! be reconstructed from logs alone. Action-required levels go to `error`.

use tracing::{error, warn};

use crate::alerts::{Alert, AlertLevel};

pub fn log_safety_alert(alert: &Alert) {
    match alert.alert_level {
        AlertLevel::Urgent | AlertLevel::Emergency => error!(
            target: "lookout::audit",
            alert_id = alert.id,
            session_id = %alert.session_id,
            guardian_id = %alert.guardian_id,
            level = %alert.alert_level,
            requires_action = alert.requires_action,
            "SAFETY ALERT: {}",
            alert.message
        ),
        AlertLevel::Info | AlertLevel::Warning => warn!(
            target: "lookout::audit",
            alert_id = alert.id,
            session_id = %alert.session_id,
            guardian_id = %alert.guardian_id,
            level = %alert.alert_level,
            requires_action = alert.requires_action,
            "Safety alert: {}",
            alert.message
        ),
    }
}

/// A classification layer failed and the message was treated as no risk
pub fn log_classification_failure(layer: &str, error: &dyn std::fmt::Display) {
    warn!(
        target: "lookout::audit",
        layer = layer,
        error = %error,
        "Classification inconclusive, treating as no risk"
    );
}
