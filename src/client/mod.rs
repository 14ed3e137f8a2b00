//! Guardian client
//!
//! A conforming monitor for one guardian. Two independent tasks feed a
//! shared dedup layer:
//!
//! - **push** - WebSocket to `/ws/guardian/{guardian_id}`, `ping` every
//!   heartbeat interval, dead after two intervals without `pong`,
//!   reconnect after a fixed backoff for as long as the client is mounted
//! - **poll** - `GET /api/guardians/{guardian_id}/alerts/unresolved` every
//!   poll interval, so alerts missed while disconnected still arrive

pub mod poll;
pub mod push;
pub mod surface;

pub use surface::{AlertSink, AlertSource, SeenAlerts, SurfacePriority, SurfacedAlert, TerminalSink};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use surface::Surfacer;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base HTTP URL of the lookout server, e.g. `http://localhost:8000`
    pub server_url: String,
    pub guardian_id: String,
    pub heartbeat_interval: Duration,
    pub reconnect_backoff: Duration,
    pub poll_interval: Duration,
}

impl ClientConfig {
    pub fn new(server_url: &str, guardian_id: &str) -> Self {
        Self {
            server_url: server_url.trim_end_matches('/').to_string(),
            guardian_id: guardian_id.to_string(),
            heartbeat_interval: Duration::from_secs(30),
            reconnect_backoff: Duration::from_secs(5),
            poll_interval: Duration::from_secs(10),
        }
    }

    pub fn push_url(&self) -> String {
        let base = self.server_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!("{}/ws/guardian/{}", ws_base, self.guardian_id)
    }

    pub fn poll_url(&self) -> String {
        format!(
            "{}/api/guardians/{}/alerts/unresolved",
            self.server_url.trim_end_matches('/'),
            self.guardian_id
        )
    }
}

pub struct GuardianClient {
    config: Arc<ClientConfig>,
    surfacer: Arc<Surfacer>,
}

impl GuardianClient {
    pub fn new(config: ClientConfig, sink: Arc<dyn AlertSink>) -> Self {
        Self {
            config: Arc::new(config),
            surfacer: Arc::new(Surfacer::new(sink)),
        }
    }

    /// Start the push and poll tasks
    pub fn mount(self) -> MountedClient {
        let (shutdown, shutdown_rx) = watch::channel(false);

        info!(
            guardian_id = %self.config.guardian_id,
            "Mounting guardian client against {}",
            self.config.server_url
        );

        let push = tokio::spawn(push::run_push(
            Arc::clone(&self.config),
            Arc::clone(&self.surfacer),
            shutdown_rx.clone(),
        ));
        let poll = tokio::spawn(poll::run_poll(
            Arc::clone(&self.config),
            Arc::clone(&self.surfacer),
            shutdown_rx,
        ));

        MountedClient {
            shutdown,
            push,
            poll,
        }
    }
}

/// A running client. Dropping it also stops both tasks, without waiting for them.
pub struct MountedClient {
    shutdown: watch::Sender<bool>,
    push: JoinHandle<()>,
    poll: JoinHandle<()>,
}

impl MountedClient {
    /// Close the push channel explicitly and stop polling. No reconnect follows.
    pub async fn unmount(self) {
        let _ = self.shutdown.send(true);
        let _ = self.push.await;
        let _ = self.poll.await;
        info!("Guardian client unmounted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_from_http_base() {
        let config = ClientConfig::new("http://localhost:8000/", "g1");
        assert_eq!(config.push_url(), "ws://localhost:8000/ws/guardian/g1");
        assert_eq!(config.poll_url(), "http://localhost:8000/api/guardians/g1/alerts/unresolved");
    }

    #[test]
    fn test_urls_from_https_base() {
        let config = ClientConfig::new("https://lookout.example", "g1");
        assert_eq!(config.push_url(), "wss://lookout.example/ws/guardian/g1");
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::new("http://x", "g");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.reconnect_backoff, Duration::from_secs(5));
        assert_eq!(config.poll_interval, Duration::from_secs(10));
    }
}
