//! Guardian connection state machine
//!
//! ```text
//! Connecting ──► Open ──► Heartbeating ⇄ Idle ──► Closing ──► Closed
//!      │           │            │          │                    ▲
//!      └───────────┴────────────┴──────────┴────────────────────┘
//!        failed handshake / heartbeat timeout
//! ```
//!
//! `Closed` is terminal; a reconnecting client gets a new connection.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use super::frame::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Open,
    Heartbeating,
    Idle,
    Closing,
    Closed,
}

impl ConnectionState {
    /// Accepting pushes
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Open | Self::Heartbeating | Self::Idle)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Open)
                | (Connecting, Closed)
                | (Open, Heartbeating)
                | (Heartbeating, Idle)
                | (Idle, Heartbeating)
                | (Open | Heartbeating | Idle, Closing)
                | (Open | Heartbeating | Idle, Closed)
                | (Closing, Closed)
        )
    }
}

/// Why a push into a connection's queue failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushFailure {
    /// Queue full: the writer is not keeping up
    Full,
    /// Writer gone or connection no longer live
    Closed,
}

/// One live push channel to a guardian
pub struct GuardianConnection {
    id: Uuid,
    guardian_id: String,
    opened_at: DateTime<Utc>,
    base: Instant,
    /// Micros since `base` of the last heartbeat
    last_heartbeat: AtomicU64,
    state: watch::Sender<ConnectionState>,
    outbound: mpsc::Sender<Frame>,
}

impl GuardianConnection {
    /// New connection in `Connecting` with a bounded outbound queue
    pub fn new(guardian_id: &str, capacity: usize) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let conn = Arc::new(Self {
            id: Uuid::new_v4(),
            guardian_id: guardian_id.to_string(),
            opened_at: Utc::now(),
            base: Instant::now(),
            last_heartbeat: AtomicU64::new(0),
            state,
            outbound,
        });
        (conn, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn guardian_id(&self) -> &str {
        &self.guardian_id
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state changes; the socket tasks use this to stop on close
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Apply a transition if the state machine allows it
    pub fn transition(&self, next: ConnectionState) -> bool {
        self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                false
            }
        })
    }

    pub fn last_heartbeat_at(&self) -> Instant {
        self.base + Duration::from_micros(self.last_heartbeat.load(Ordering::Relaxed))
    }

    pub fn touch(&self) {
        let elapsed = self.base.elapsed().as_micros() as u64;
        self.last_heartbeat.store(elapsed, Ordering::Relaxed);
    }

    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_heartbeat_at()) > timeout
    }

    /// Non-blocking enqueue for the writer task
    pub fn try_push(&self, frame: Frame) -> Result<(), PushFailure> {
        if !self.state().is_live() {
            return Err(PushFailure::Closed);
        }
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PushFailure::Full,
            mpsc::error::TrySendError::Closed(_) => PushFailure::Closed,
        })
    }
}

impl std::fmt::Debug for GuardianConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardianConnection")
            .field("id", &self.id)
            .field("guardian_id", &self.guardian_id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn test_happy_path_transitions() {
        let (conn, _rx) = GuardianConnection::new("g1", 4);
        assert_eq!(conn.state(), Connecting);
        assert!(conn.transition(Open));
        assert!(conn.transition(Heartbeating));
        assert!(conn.transition(Idle));
        assert!(conn.transition(Heartbeating));
        assert!(conn.transition(Closing));
        assert!(conn.transition(Closed));
    }

    #[test]
    fn test_closed_is_terminal() {
        let (conn, _rx) = GuardianConnection::new("g1", 4);
        assert!(conn.transition(Closed));
        for next in [Connecting, Open, Heartbeating, Idle, Closing, Closed] {
            assert!(!conn.transition(next));
        }
        assert!(conn.state().is_terminal());
    }

    #[test]
    fn test_cannot_skip_open() {
        let (conn, _rx) = GuardianConnection::new("g1", 4);
        assert!(!conn.transition(Heartbeating));
        assert!(!conn.transition(Closing));
        assert_eq!(conn.state(), Connecting);
    }

    #[test]
    fn test_push_requires_live_state() {
        let (conn, mut rx) = GuardianConnection::new("g1", 4);
        assert_eq!(conn.try_push(Frame::Pong), Err(PushFailure::Closed));

        conn.transition(Open);
        conn.try_push(Frame::Pong).unwrap();
        assert_eq!(rx.try_recv().unwrap(), Frame::Pong);
    }

    #[test]
    fn test_full_queue_reported() {
        let (conn, _rx) = GuardianConnection::new("g1", 1);
        conn.transition(Open);
        conn.try_push(Frame::Pong).unwrap();
        assert_eq!(conn.try_push(Frame::Pong), Err(PushFailure::Full));
    }

    #[test]
    fn test_staleness() {
        let (conn, _rx) = GuardianConnection::new("g1", 1);
        conn.touch();
        let now = Instant::now();
        assert!(!conn.is_stale(now, Duration::from_secs(60)));
        assert!(conn.is_stale(now + Duration::from_secs(61), Duration::from_secs(60)));
    }
}
