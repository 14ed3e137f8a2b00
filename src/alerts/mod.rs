//! Alert store
//!
//! Creates, persists and resolves guardian alerts, then hands each new
//! alert to the notification broker without making the caller wait for
//! delivery.
//!
//! ## Flow
//!
//! ```text
//! create ──► repository.insert ──► audit log ──► notify queue (unbounded)
//!                                                      │
//!                              dispatcher task ◄───────┘
//!                                   │
//!                      broker.publish ──► mark_notified
//! ```
//!
//! Insert and enqueue happen under one lock, so queue order is id order.
//! One dispatcher drains the queue in that order, which keeps every
//! connection's view of a session in `created_at` order.

pub mod model;
pub mod repository;

pub use model::{format_timestamp, next_created_at, Alert, AlertLevel, AlertTrigger, NewAlert, SessionRef};
pub(crate) use model::timestamp;
pub use repository::{AlertRepository, MemoryAlertRepository};

use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::broker::NotificationBroker;
use crate::logging::log_safety_alert;
use crate::types::{LookoutError, Result};

/// Default continuous-activity threshold in minutes
pub const DEFAULT_ACTIVITY_ALERT_MINUTES: u32 = 120;

pub struct AlertStore {
    repo: Arc<dyn AlertRepository>,
    /// Held across insert and enqueue
    notify_tx: Mutex<mpsc::UnboundedSender<Alert>>,
    pending: Arc<AtomicUsize>,
    activity_alert_minutes: u32,
}

impl AlertStore {
    /// Build the store and spawn its notification dispatcher
    pub fn start(
        repo: Arc<dyn AlertRepository>,
        broker: Arc<NotificationBroker>,
        activity_alert_minutes: u32,
    ) -> Arc<Self> {
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));

        tokio::spawn(run_dispatcher(
            Arc::clone(&repo),
            broker,
            notify_rx,
            Arc::clone(&pending),
        ));

        Arc::new(Self {
            repo,
            notify_tx: Mutex::new(notify_tx),
            pending,
            activity_alert_minutes,
        })
    }

    /// Persist a new alert and queue it for push delivery.
    ///
    /// Returns once the row is durable. Delivery happens afterwards and its
    /// failure never affects the stored alert.
    pub async fn create(&self, session: SessionRef, trigger: AlertTrigger) -> Result<Alert> {
        session.validate()?;
        let new = NewAlert::from_trigger(session, trigger);
        if new.message.trim().is_empty() {
            return Err(LookoutError::BadRequest("alert message must not be empty".into()));
        }

        let notify_tx = self.notify_tx.lock().await;
        let alert = self.repo.insert(new).await?;

        self.pending.fetch_add(1, Ordering::SeqCst);
        if notify_tx.send(alert.clone()).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!(alert_id = alert.id, "Notification dispatcher stopped, alert left for fallback poll");
        }
        drop(notify_tx);

        log_safety_alert(&alert);
        Ok(alert)
    }

    /// Mark an alert resolved. Resolving twice is a no-op.
    pub async fn resolve(&self, alert_id: i64) -> Result<Alert> {
        let alert = self
            .repo
            .resolve(alert_id, Utc::now())
            .await?
            .ok_or_else(|| LookoutError::NotFound(format!("alert {}", alert_id)))?;

        info!(alert_id = alert.id, session_id = %alert.session_id, "Alert resolved");
        Ok(alert)
    }

    pub async fn get(&self, alert_id: i64) -> Result<Alert> {
        self.repo
            .get(alert_id)
            .await?
            .ok_or_else(|| LookoutError::NotFound(format!("alert {}", alert_id)))
    }

    /// Unresolved alerts of a session, oldest first. Safe to call repeatedly.
    pub async fn list_unresolved(&self, session_id: &str) -> Result<Vec<Alert>> {
        self.repo.list_for_session(session_id, true).await
    }

    /// Full history of a session, oldest first
    pub async fn list_for_session(&self, session_id: &str) -> Result<Vec<Alert>> {
        self.repo.list_for_session(session_id, false).await
    }

    /// What a guardian's fallback poll sees
    pub async fn list_unresolved_for_guardian(&self, guardian_id: &str) -> Result<Vec<Alert>> {
        self.repo.list_unresolved_for_guardian(guardian_id).await
    }

    pub async fn guardian_for_session(&self, session_id: &str) -> Result<Option<String>> {
        self.repo.guardian_for_session(session_id).await
    }

    pub async fn unresolved_count(&self) -> Result<u64> {
        self.repo.unresolved_count().await
    }

    /// Raise an info alert once an activity runs past the threshold.
    ///
    /// At or below the threshold nothing is created.
    pub async fn activity_alert(
        &self,
        session: SessionRef,
        activity_type: &str,
        duration_minutes: u32,
    ) -> Result<Option<Alert>> {
        if duration_minutes <= self.activity_alert_minutes {
            return Ok(None);
        }

        let trigger = AlertTrigger::Activity {
            activity_type: activity_type.to_string(),
            duration_minutes,
        };
        self.create(session, trigger).await.map(Some)
    }

    /// Alerts queued but not yet handed to the broker
    pub fn pending_notifications(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

async fn run_dispatcher(
    repo: Arc<dyn AlertRepository>,
    broker: Arc<NotificationBroker>,
    mut rx: mpsc::UnboundedReceiver<Alert>,
    pending: Arc<AtomicUsize>,
) {
    debug!("Notification dispatcher started");

    while let Some(alert) = rx.recv().await {
        let report = broker.publish(&alert.guardian_id, &alert);

        if report.attempted > 0 {
            if let Err(e) = repo.mark_notified(alert.id).await {
                warn!(alert_id = alert.id, "Failed to record notification attempt: {}", e);
            }
        } else {
            debug!(
                alert_id = alert.id,
                guardian_id = %alert.guardian_id,
                "No live connections, alert left for fallback poll"
            );
        }

        pending.fetch_sub(1, Ordering::SeqCst);
    }

    debug!("Notification dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerConfig, Frame};
    use crate::classifier::{AssessmentSource, RiskAssessment, RiskLevel};
    use std::time::Duration;

    fn store() -> (Arc<AlertStore>, Arc<NotificationBroker>) {
        let broker = Arc::new(NotificationBroker::new(BrokerConfig::default()));
        let store = AlertStore::start(
            Arc::new(MemoryAlertRepository::new()),
            Arc::clone(&broker),
            DEFAULT_ACTIVITY_ALERT_MINUTES,
        );
        (store, broker)
    }

    async fn drain(store: &AlertStore) {
        for _ in 0..100 {
            if store.pending_notifications() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("notification queue did not drain");
    }

    #[tokio::test]
    async fn test_fell_down_creates_warning() {
        let (store, _broker) = store();
        let assessment = RiskAssessment::new(RiskLevel::Medium, "concern keyword \"fell\"", false, AssessmentSource::Keyword);

        let alert = store
            .create(
                SessionRef::new("s1", "g1"),
                AlertTrigger::Risk {
                    assessment,
                    message: "I fell down and my knee hurts".into(),
                },
            )
            .await
            .unwrap();

        assert_eq!(alert.alert_level, AlertLevel::Warning);
        assert!(!alert.requires_action);
        assert!(!alert.resolved);
    }

    #[tokio::test]
    async fn test_alert_survives_zero_connections() {
        let (store, _broker) = store();
        let alert = store
            .create(SessionRef::new("s1", "g1"), AlertTrigger::Emergency { reason: None })
            .await
            .unwrap();
        drain(&store).await;

        let open = store.list_unresolved("s1").await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, alert.id);
        assert!(!open[0].guardian_notified);
    }

    #[tokio::test]
    async fn test_live_connection_is_pushed_and_marked() {
        let (store, broker) = store();
        let (_conn, mut rx) = broker.connect("g1");

        let alert = store
            .create(SessionRef::new("s1", "g1"), AlertTrigger::Emergency { reason: None })
            .await
            .unwrap();
        drain(&store).await;

        assert!(matches!(rx.try_recv(), Ok(Frame::Text(_))));
        assert!(store.get(alert.id).await.unwrap().guardian_notified);
    }

    #[tokio::test]
    async fn test_resolve_is_idempotent_and_unknown_is_not_found() {
        let (store, _broker) = store();
        let alert = store
            .create(SessionRef::new("s1", "g1"), AlertTrigger::Emergency { reason: None })
            .await
            .unwrap();

        let once = store.resolve(alert.id).await.unwrap();
        let twice = store.resolve(alert.id).await.unwrap();
        assert_eq!(once, twice);
        assert!(store.list_unresolved("s1").await.unwrap().is_empty());
        assert_eq!(store.list_for_session("s1").await.unwrap().len(), 1);

        assert!(matches!(store.resolve(4242).await, Err(LookoutError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_activity_threshold() {
        let (store, _broker) = store();
        let session = SessionRef::new("s1", "g1");

        assert!(store.activity_alert(session.clone(), "drawing", 120).await.unwrap().is_none());
        let alert = store
            .activity_alert(session, "drawing", 121)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(alert.alert_level, AlertLevel::Info);
        assert!(alert.message.contains("121 minutes"));
    }

    #[tokio::test]
    async fn test_empty_session_rejected() {
        let (store, _broker) = store();
        let err = store
            .create(SessionRef::new("", "g1"), AlertTrigger::Emergency { reason: None })
            .await
            .unwrap_err();
        assert!(matches!(err, LookoutError::BadRequest(_)));
    }
}
