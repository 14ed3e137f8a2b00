//! Notification broker
//!
//! Registry of live guardian push channels and fan-out of alerts to them.
//!
//! ## Delivery model
//!
//! - Each connection owns a bounded FIFO queue drained by one writer task.
//! - `publish` snapshots the guardian's connections and `try_send`s into
//!   each queue; it never awaits socket I/O and never fails.
//! - A full or closed queue tears that one connection down. The guardian
//!   recovers missed alerts through the fallback poll.
//! - Connections silent for longer than the heartbeat timeout are reaped.

pub mod connection;
pub mod frame;

pub use connection::{ConnectionState, GuardianConnection, PushFailure};
pub use frame::{parse_inbound, Frame, Inbound, PushMessage, PING, PONG};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::alerts::Alert;

/// Broker tuning
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Silence after which a connection is closed
    pub heartbeat_timeout: Duration,
    /// Outbound frames buffered per connection
    pub queue_capacity: usize,
    /// Bound on a single socket write
    pub write_timeout: Duration,
    /// How often the reaper scans for stale connections
    pub reap_interval: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(75),
            queue_capacity: 64,
            write_timeout: Duration::from_secs(5),
            reap_interval: Duration::from_secs(15),
        }
    }
}

/// Outcome of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    /// Live connections at snapshot time
    pub attempted: usize,
    /// Frames accepted into a connection queue
    pub delivered: usize,
    /// Connections torn down because their queue refused the frame
    pub dropped: usize,
}

/// Presence snapshot of one connection
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub connection_id: Uuid,
    pub state: ConnectionState,
    #[serde(with = "crate::alerts::timestamp")]
    pub opened_at: DateTime<Utc>,
}

pub struct NotificationBroker {
    connections: DashMap<String, HashMap<Uuid, Arc<GuardianConnection>>>,
    config: BrokerConfig,
}

impl NotificationBroker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            connections: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Create, open and register a connection in one step
    pub fn connect(&self, guardian_id: &str) -> (Arc<GuardianConnection>, mpsc::Receiver<Frame>) {
        let (conn, rx) = self.pending(guardian_id);
        self.open(&conn);
        (conn, rx)
    }

    /// Connection in `Connecting`, not yet visible to `publish`
    pub fn pending(&self, guardian_id: &str) -> (Arc<GuardianConnection>, mpsc::Receiver<Frame>) {
        GuardianConnection::new(guardian_id, self.config.queue_capacity)
    }

    /// Handshake completed: start the heartbeat clock and register
    pub fn open(&self, connection: &Arc<GuardianConnection>) -> bool {
        connection.touch();
        if !connection.transition(ConnectionState::Open) {
            return false;
        }
        self.register(connection.guardian_id(), Arc::clone(connection));
        true
    }

    pub fn register(&self, guardian_id: &str, connection: Arc<GuardianConnection>) {
        let id = connection.id();
        self.connections
            .entry(guardian_id.to_string())
            .or_default()
            .insert(id, connection);

        info!(
            guardian_id = %guardian_id,
            connection_id = %id,
            connections = self.connection_count(guardian_id),
            "Guardian connection registered"
        );
    }

    /// Remove a connection. Returns false when it was not registered.
    pub fn unregister(&self, guardian_id: &str, connection_id: Uuid) -> bool {
        let removed = match self.connections.get_mut(guardian_id) {
            Some(mut conns) => conns.remove(&connection_id).is_some(),
            None => false,
        };
        self.connections.remove_if(guardian_id, |_, conns| conns.is_empty());

        if removed {
            debug!(guardian_id = %guardian_id, connection_id = %connection_id, "Guardian connection unregistered");
        }
        removed
    }

    /// Push an alert snapshot to every live connection of the guardian
    pub fn publish(&self, guardian_id: &str, alert: &Alert) -> PublishReport {
        let report = self.send_update(guardian_id, &PushMessage::from_alert(alert));
        debug!(
            alert_id = alert.id,
            guardian_id = %guardian_id,
            attempted = report.attempted,
            delivered = report.delivered,
            dropped = report.dropped,
            "Alert published"
        );
        report
    }

    /// Push any message through the alert delivery path
    pub fn send_update(&self, guardian_id: &str, message: &PushMessage) -> PublishReport {
        let text = match message.encode() {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode push message: {}", e);
                return PublishReport::default();
            }
        };

        let mut report = PublishReport::default();
        for conn in self.snapshot(guardian_id) {
            if !conn.state().is_live() {
                continue;
            }
            report.attempted += 1;
            match conn.try_push(Frame::Text(text.clone())) {
                Ok(()) => report.delivered += 1,
                Err(failure) => {
                    report.dropped += 1;
                    self.tear_down(&conn, failure);
                }
            }
        }
        report
    }

    /// Client heartbeat: refresh liveness and queue the `pong`
    pub fn record_heartbeat(&self, connection: &Arc<GuardianConnection>) {
        connection.touch();
        connection.transition(ConnectionState::Heartbeating);
        match connection.try_push(Frame::Pong) {
            Ok(()) => {
                connection.transition(ConnectionState::Idle);
            }
            Err(failure) => self.tear_down(connection, failure),
        }
    }

    /// Close a connection whose socket went away or failed
    pub fn close(&self, connection: &GuardianConnection) {
        connection.transition(ConnectionState::Closing);
        self.unregister(connection.guardian_id(), connection.id());
        connection.transition(ConnectionState::Closed);
    }

    /// Close a connection that stopped heartbeating
    pub fn expire(&self, connection: &GuardianConnection) {
        if connection.transition(ConnectionState::Closed) {
            info!(
                guardian_id = %connection.guardian_id(),
                connection_id = %connection.id(),
                "Guardian connection heartbeat timed out"
            );
        }
        self.unregister(connection.guardian_id(), connection.id());
    }

    fn tear_down(&self, connection: &GuardianConnection, failure: PushFailure) {
        warn!(
            guardian_id = %connection.guardian_id(),
            connection_id = %connection.id(),
            reason = ?failure,
            "Tearing down guardian connection"
        );
        self.close(connection);
    }

    /// Expire every connection silent since before `now - heartbeat_timeout`
    pub fn reap_stale(&self, now: Instant) -> usize {
        let timeout = self.config.heartbeat_timeout;
        let stale: Vec<Arc<GuardianConnection>> = self
            .connections
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .values()
                    .filter(|c| c.is_stale(now, timeout))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();

        for conn in &stale {
            self.expire(conn);
        }
        stale.len()
    }

    pub fn connection_count(&self, guardian_id: &str) -> usize {
        self.connections.get(guardian_id).map(|c| c.len()).unwrap_or(0)
    }

    pub fn total_connections(&self) -> usize {
        self.connections.iter().map(|e| e.value().len()).sum()
    }

    pub fn guardian_count(&self) -> usize {
        self.connections.len()
    }

    /// Presence of a guardian's connections, oldest first
    pub fn connections_for(&self, guardian_id: &str) -> Vec<ConnectionInfo> {
        let mut infos: Vec<ConnectionInfo> = self
            .snapshot(guardian_id)
            .iter()
            .map(|c| ConnectionInfo {
                connection_id: c.id(),
                state: c.state(),
                opened_at: c.opened_at(),
            })
            .collect();
        infos.sort_by_key(|i| i.opened_at);
        infos
    }

    fn snapshot(&self, guardian_id: &str) -> Vec<Arc<GuardianConnection>> {
        self.connections
            .get(guardian_id)
            .map(|conns| conns.values().cloned().collect())
            .unwrap_or_default()
    }
}

/// Spawn the periodic stale-connection reaper
pub fn spawn_reaper(broker: Arc<NotificationBroker>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(broker.config.reap_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let reaped = broker.reap_stale(Instant::now());
            if reaped > 0 {
                info!("Reaped {} stale guardian connection(s)", reaped);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertTrigger, NewAlert, SessionRef};

    fn broker(capacity: usize) -> NotificationBroker {
        NotificationBroker::new(BrokerConfig {
            queue_capacity: capacity,
            heartbeat_timeout: Duration::from_secs(60),
            ..Default::default()
        })
    }

    fn alert(id: i64) -> Alert {
        NewAlert::from_trigger(
            SessionRef::new("s1", "g1"),
            AlertTrigger::Emergency { reason: None },
        )
        .into_alert(id, Utc::now())
    }

    #[test]
    fn test_publish_without_connections_is_empty() {
        let b = broker(4);
        assert_eq!(b.publish("g1", &alert(1)), PublishReport::default());
    }

    #[test]
    fn test_publish_reaches_every_connection() {
        let b = broker(4);
        let (_c1, mut rx1) = b.connect("g1");
        let (_c2, mut rx2) = b.connect("g1");
        let (_other, mut rx3) = b.connect("g2");

        let report = b.publish("g1", &alert(1));
        assert_eq!(report.attempted, 2);
        assert_eq!(report.delivered, 2);

        assert!(matches!(rx1.try_recv(), Ok(Frame::Text(_))));
        assert!(matches!(rx2.try_recv(), Ok(Frame::Text(_))));
        assert!(rx3.try_recv().is_err());
    }

    #[test]
    fn test_slow_connection_is_torn_down_alone() {
        let b = broker(1);
        let (slow, _slow_rx) = b.connect("g1");
        let (fast, mut fast_rx) = b.connect("g1");

        b.publish("g1", &alert(1));
        fast_rx.try_recv().unwrap();

        let report = b.publish("g1", &alert(2));
        assert_eq!(report.attempted, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, 1);

        assert_eq!(slow.state(), ConnectionState::Closed);
        assert!(fast.state().is_live());
        assert_eq!(b.connection_count("g1"), 1);
    }

    #[test]
    fn test_dropped_receiver_tears_down() {
        let b = broker(4);
        let (conn, rx) = b.connect("g1");
        drop(rx);

        let report = b.publish("g1", &alert(1));
        assert_eq!(report.dropped, 1);
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(b.total_connections(), 0);
    }

    #[test]
    fn test_heartbeat_queues_pong_and_idles() {
        let b = broker(4);
        let (conn, mut rx) = b.connect("g1");

        b.record_heartbeat(&conn);
        assert_eq!(rx.try_recv().unwrap(), Frame::Pong);
        assert_eq!(conn.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_reaper_expires_silent_connections() {
        let b = broker(4);
        let (stale, _rx) = b.connect("g1");

        assert_eq!(b.reap_stale(Instant::now()), 0);
        let later = Instant::now() + Duration::from_secs(61);
        assert_eq!(b.reap_stale(later), 1);

        assert_eq!(stale.state(), ConnectionState::Closed);
        assert_eq!(b.connection_count("g1"), 0);
        assert_eq!(b.guardian_count(), 0);
        assert_eq!(b.publish("g1", &alert(1)), PublishReport::default());
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let b = broker(4);
        let (conn, _rx) = b.connect("g1");
        assert!(b.unregister("g1", conn.id()));
        assert!(!b.unregister("g1", conn.id()));
        assert!(!b.unregister("nobody", conn.id()));
    }

    #[test]
    fn test_activity_update_uses_same_path() {
        let b = broker(4);
        let (_conn, mut rx) = b.connect("g1");
        let report = b.send_update("g1", &PushMessage::activity_update("s1", "reading", 30));
        assert_eq!(report.delivered, 1);
        match rx.try_recv().unwrap() {
            Frame::Text(text) => assert!(text.contains("activity_update")),
            other => panic!("unexpected frame {:?}", other),
        }
    }
}
