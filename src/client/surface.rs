//! Surfacing alerts to the guardian
//!
//! Both delivery channels feed the same `Surfacer`, which drops repeats and
//! hands each alert once to the `AlertSink` with a priority derived from
//! its level.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::alerts::{format_timestamp, Alert, AlertLevel};

/// How insistently an alert is presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfacePriority {
    /// Shown briefly, dismisses itself
    Transient,
    Standard,
    /// Stays until acknowledged
    Persistent,
    /// Persistent and audible
    Blocking,
}

impl SurfacePriority {
    pub fn for_level(level: AlertLevel) -> Self {
        match level {
            AlertLevel::Info => Self::Transient,
            AlertLevel::Warning => Self::Standard,
            AlertLevel::Urgent => Self::Persistent,
            AlertLevel::Emergency => Self::Blocking,
        }
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::Persistent | Self::Blocking)
    }

    pub fn is_audible(&self) -> bool {
        matches!(self, Self::Blocking)
    }
}

/// Channel an alert arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSource {
    Push,
    Poll,
}

/// An alert as presented to the guardian
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurfacedAlert {
    pub level: AlertLevel,
    pub message: String,
    pub context: Option<String>,
    pub timestamp: String,
    pub requires_action: bool,
    pub priority: SurfacePriority,
    pub source: AlertSource,
}

impl SurfacedAlert {
    pub fn from_push(
        level: AlertLevel,
        message: String,
        context: Option<String>,
        timestamp: String,
        requires_action: bool,
    ) -> Self {
        Self {
            priority: SurfacePriority::for_level(level),
            level,
            message,
            context,
            timestamp,
            requires_action,
            source: AlertSource::Push,
        }
    }

    pub fn from_polled(alert: &Alert) -> Self {
        Self {
            level: alert.alert_level,
            message: alert.message.clone(),
            context: alert.context.clone(),
            timestamp: format_timestamp(&alert.created_at),
            requires_action: alert.requires_action,
            priority: SurfacePriority::for_level(alert.alert_level),
            source: AlertSource::Poll,
        }
    }

    /// Identity shared by both channels: the push payload carries no id
    pub fn key(&self) -> AlertKey {
        AlertKey {
            timestamp: self.timestamp.clone(),
            level: self.level,
            message: self.message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlertKey {
    timestamp: String,
    level: AlertLevel,
    message: String,
}

/// Presentation seam for a guardian UI
pub trait AlertSink: Send + Sync {
    fn surface(&self, alert: &SurfacedAlert);

    fn activity(&self, _session_id: &str, _activity_type: &str, _duration_minutes: u32) {}

    fn connection_changed(&self, _connected: bool) {}
}

/// Alerts already surfaced.
///
/// Each successful poll prunes keys that are no longer unresolved, so the
/// set tracks the guardian's unresolved list plus anything pushed since the
/// poll began.
#[derive(Debug, Default)]
pub struct SeenAlerts {
    /// Key to the sighting sequence number
    keys: HashMap<AlertKey, u64>,
    next_seq: u64,
}

impl SeenAlerts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `key`; true only the first time it is seen
    pub fn first_sighting(&mut self, key: AlertKey) -> bool {
        if self.keys.contains_key(&key) {
            return false;
        }
        self.keys.insert(key, self.next_seq);
        self.next_seq += 1;
        true
    }

    /// Sequence point to pass to `retain_unresolved` after a poll
    pub fn mark(&self) -> u64 {
        self.next_seq
    }

    /// Forget keys missing from `unresolved` that were first seen before `since`
    pub fn retain_unresolved(&mut self, unresolved: &HashSet<AlertKey>, since: u64) {
        self.keys
            .retain(|key, seq| *seq >= since || unresolved.contains(key));
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Dedup in front of the sink, shared by the push and poll tasks
pub(crate) struct Surfacer {
    seen: Mutex<SeenAlerts>,
    sink: Arc<dyn AlertSink>,
}

impl Surfacer {
    pub(crate) fn new(sink: Arc<dyn AlertSink>) -> Self {
        Self {
            seen: Mutex::new(SeenAlerts::new()),
            sink,
        }
    }

    pub(crate) fn sink(&self) -> &dyn AlertSink {
        self.sink.as_ref()
    }

    /// Surface unless already seen. Returns whether it was surfaced.
    pub(crate) fn offer(&self, alert: SurfacedAlert) -> bool {
        let fresh = match self.seen.lock() {
            Ok(mut seen) => seen.first_sighting(alert.key()),
            Err(e) => {
                warn!("Seen-alert set poisoned, surfacing anyway: {}", e);
                true
            }
        };

        if fresh {
            self.sink.surface(&alert);
        } else {
            debug!(source = ?alert.source, "Duplicate alert suppressed");
        }
        fresh
    }

    pub(crate) fn mark(&self) -> u64 {
        self.seen.lock().map(|seen| seen.mark()).unwrap_or(0)
    }

    /// Surface a poll result, then drop keys the poll no longer lists
    pub(crate) fn offer_polled(&self, alerts: &[Alert], since: u64) -> usize {
        let surfaced = alerts
            .iter()
            .filter(|a| self.offer(SurfacedAlert::from_polled(a)))
            .count();

        let unresolved: HashSet<AlertKey> = alerts
            .iter()
            .map(|a| SurfacedAlert::from_polled(a).key())
            .collect();
        match self.seen.lock() {
            Ok(mut seen) => seen.retain_unresolved(&unresolved, since),
            Err(e) => warn!("Seen-alert set poisoned, skipping prune: {}", e),
        }
        surfaced
    }
}

/// Prints alerts to stdout; emergencies ring the terminal bell
pub struct TerminalSink;

impl AlertSink for TerminalSink {
    fn surface(&self, alert: &SurfacedAlert) {
        let mut out = std::io::stdout().lock();
        let result = if alert.priority.is_audible() {
            writeln!(
                out,
                "\x07\n!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!\n  {} {}\n  {}\n!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!",
                alert.level.as_str().to_uppercase(),
                alert.timestamp,
                alert.message
            )
        } else {
            writeln!(
                out,
                "[{}] {} {}{}",
                alert.level,
                alert.timestamp,
                alert.message,
                if alert.requires_action { " (action required)" } else { "" }
            )
        };
        if let Err(e) = result.and_then(|_| out.flush()) {
            warn!("Failed to write alert to terminal: {}", e);
        }
    }

    fn activity(&self, session_id: &str, activity_type: &str, duration_minutes: u32) {
        println!("[activity] {} {} for {} min", session_id, activity_type, duration_minutes);
    }

    fn connection_changed(&self, connected: bool) {
        println!("[push] {}", if connected { "connected" } else { "disconnected, polling" });
    }
}
