//! End-to-end tests of classifier → store → broker without sockets
//!
//! Uses stub semantic services, the in-memory repository and direct broker
//! connections in place of WebSockets.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lookout::alerts::{
    Alert, AlertLevel, AlertRepository, AlertStore, AlertTrigger, MemoryAlertRepository, NewAlert,
    SessionRef,
};
use lookout::broker::{BrokerConfig, Frame, NotificationBroker, PushMessage};
use lookout::classifier::{
    ClassifierConfig, ClassifierError, Emotion, EmotionDetector, RiskClassifier, RiskLevel,
    SemanticJudgment, SemanticRiskService,
};
use lookout::db::SqliteAlertRepository;
use lookout::LookoutError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Semantic service that never answers in time
struct SlowSemantic {
    calls: AtomicUsize,
}

#[async_trait]
impl SemanticRiskService for SlowSemantic {
    async fn assess(&self, _message: &str, _age: u32) -> Result<SemanticJudgment, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;
        Err(ClassifierError::Status(504))
    }
}

#[async_trait]
impl EmotionDetector for SlowSemantic {
    async fn detect(&self, _message: &str) -> Result<Emotion, ClassifierError> {
        Ok(Emotion::Neutral)
    }
}

/// Repository whose writes always fail
struct BrokenRepository;

#[async_trait]
impl AlertRepository for BrokenRepository {
    async fn insert(&self, _alert: NewAlert) -> lookout::Result<Alert> {
        Err(LookoutError::Persistence("disk I/O error".into()))
    }
    async fn get(&self, _alert_id: i64) -> lookout::Result<Option<Alert>> {
        Ok(None)
    }
    async fn resolve(&self, _alert_id: i64, _at: DateTime<Utc>) -> lookout::Result<Option<Alert>> {
        Ok(None)
    }
    async fn mark_notified(&self, _alert_id: i64) -> lookout::Result<()> {
        Ok(())
    }
    async fn list_for_session(&self, _session_id: &str, _unresolved_only: bool) -> lookout::Result<Vec<Alert>> {
        Ok(Vec::new())
    }
    async fn list_unresolved_for_guardian(&self, _guardian_id: &str) -> lookout::Result<Vec<Alert>> {
        Ok(Vec::new())
    }
    async fn guardian_for_session(&self, _session_id: &str) -> lookout::Result<Option<String>> {
        Ok(None)
    }
    async fn unresolved_count(&self) -> lookout::Result<u64> {
        Ok(0)
    }
}

/// Memory repository whose first insert returns late
struct LaggingRepository {
    inner: MemoryAlertRepository,
    inserts: AtomicUsize,
}

#[async_trait]
impl AlertRepository for LaggingRepository {
    async fn insert(&self, alert: NewAlert) -> lookout::Result<Alert> {
        let stored = self.inner.insert(alert).await?;
        if self.inserts.fetch_add(1, Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        Ok(stored)
    }
    async fn get(&self, alert_id: i64) -> lookout::Result<Option<Alert>> {
        self.inner.get(alert_id).await
    }
    async fn resolve(&self, alert_id: i64, at: DateTime<Utc>) -> lookout::Result<Option<Alert>> {
        self.inner.resolve(alert_id, at).await
    }
    async fn mark_notified(&self, alert_id: i64) -> lookout::Result<()> {
        self.inner.mark_notified(alert_id).await
    }
    async fn list_for_session(&self, session_id: &str, unresolved_only: bool) -> lookout::Result<Vec<Alert>> {
        self.inner.list_for_session(session_id, unresolved_only).await
    }
    async fn list_unresolved_for_guardian(&self, guardian_id: &str) -> lookout::Result<Vec<Alert>> {
        self.inner.list_unresolved_for_guardian(guardian_id).await
    }
    async fn guardian_for_session(&self, session_id: &str) -> lookout::Result<Option<String>> {
        self.inner.guardian_for_session(session_id).await
    }
    async fn unresolved_count(&self) -> lookout::Result<u64> {
        self.inner.unresolved_count().await
    }
}

fn pipeline(repo: Arc<dyn AlertRepository>) -> (Arc<AlertStore>, Arc<NotificationBroker>) {
    let broker = Arc::new(NotificationBroker::new(BrokerConfig {
        heartbeat_timeout: Duration::from_secs(60),
        ..Default::default()
    }));
    let store = AlertStore::start(repo, Arc::clone(&broker), 120);
    (store, broker)
}

async fn wait_for_dispatch(store: &AlertStore) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while store.pending_notifications() > 0 {
        assert!(Instant::now() < deadline, "dispatcher did not drain");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn decode(frame: Frame) -> PushMessage {
    match frame {
        Frame::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("expected a text frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_urgent_keyword_alerts_without_semantic_call() {
    let slow = Arc::new(SlowSemantic {
        calls: AtomicUsize::new(0),
    });
    let classifier = RiskClassifier::new(slow.clone(), slow.clone(), ClassifierConfig::default());
    let (store, broker) = pipeline(Arc::new(MemoryAlertRepository::new()));
    let (_conn, mut rx) = broker.connect("parent-1");

    let started = Instant::now();
    let assessment = classifier.assess("there's smoke coming from the kitchen", 7).await;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(assessment.level(), RiskLevel::Critical);
    assert_eq!(slow.calls.load(Ordering::SeqCst), 0);

    let alert = store
        .create(
            SessionRef::new("session-1", "parent-1"),
            AlertTrigger::Risk {
                assessment,
                message: "there's smoke coming from the kitchen".into(),
            },
        )
        .await
        .unwrap();
    assert_eq!(alert.alert_level, AlertLevel::Emergency);
    assert!(alert.requires_action);

    wait_for_dispatch(&store).await;
    match decode(rx.try_recv().unwrap()) {
        PushMessage::Alert { level, requires_action, .. } => {
            assert_eq!(level, AlertLevel::Emergency);
            assert!(requires_action);
        }
        other => panic!("unexpected push {:?}", other),
    }
}

#[tokio::test]
async fn test_semantic_timeout_raises_nothing() {
    let slow = Arc::new(SlowSemantic {
        calls: AtomicUsize::new(0),
    });
    let classifier = RiskClassifier::new(
        slow.clone(),
        slow.clone(),
        ClassifierConfig {
            semantic_timeout: Duration::from_millis(100),
        },
    );

    let assessment = classifier.assess("can we play a game about clouds", 6).await;
    assert_eq!(assessment.level(), RiskLevel::None);
    assert!(!assessment.requires_alert());
    assert_eq!(slow.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_emergency_with_zero_connections_is_recoverable() {
    let (store, broker) = pipeline(Arc::new(MemoryAlertRepository::new()));
    assert_eq!(broker.connection_count("parent-1"), 0);

    let alert = store
        .create(
            SessionRef::new("session-1", "parent-1"),
            AlertTrigger::Emergency { reason: None },
        )
        .await
        .unwrap();
    wait_for_dispatch(&store).await;

    let open = store.list_unresolved("session-1").await.unwrap();
    assert_eq!(open.iter().map(|a| a.id).collect::<Vec<_>>(), vec![alert.id]);
    assert_eq!(open[0].alert_level, AlertLevel::Emergency);

    let polled = store.list_unresolved_for_guardian("parent-1").await.unwrap();
    assert_eq!(polled.len(), 1);
}

#[tokio::test]
async fn test_emergency_reaches_every_live_connection_in_order() {
    let (store, broker) = pipeline(Arc::new(MemoryAlertRepository::new()));
    let (_a, mut rx_a) = broker.connect("parent-1");
    let (_b, mut rx_b) = broker.connect("parent-1");
    let session = SessionRef::new("session-1", "parent-1");

    for i in 0..5 {
        store
            .create(
                session.clone(),
                AlertTrigger::Manual {
                    level: AlertLevel::Warning,
                    message: format!("alert {}", i),
                    context: None,
                    assessment_detail: None,
                },
            )
            .await
            .unwrap();
    }
    wait_for_dispatch(&store).await;

    for rx in [&mut rx_a, &mut rx_b] {
        let mut timestamps = Vec::new();
        for i in 0..5 {
            match decode(rx.try_recv().unwrap()) {
                PushMessage::Alert { message, timestamp, .. } => {
                    assert_eq!(message, format!("alert {}", i));
                    timestamps.push(timestamp);
                }
                other => panic!("unexpected push {:?}", other),
            }
        }
        let mut sorted = timestamps.clone();
        sorted.sort();
        assert_eq!(timestamps, sorted);
    }

    for alert in store.list_for_session("session-1").await.unwrap() {
        assert!(alert.guardian_notified);
    }
}

#[tokio::test]
async fn test_unresolved_listing_is_strictly_ordered() {
    let (store, _broker) = pipeline(Arc::new(MemoryAlertRepository::new()));
    let session = SessionRef::new("session-1", "parent-1");

    for _ in 0..50 {
        store
            .create(session.clone(), AlertTrigger::Emergency { reason: None })
            .await
            .unwrap();
    }

    let first = store.list_unresolved("session-1").await.unwrap();
    let second = store.list_unresolved("session-1").await.unwrap();
    assert_eq!(first, second);
    for pair in first.windows(2) {
        assert!(pair[0].id < pair[1].id);
        assert!(pair[0].created_at < pair[1].created_at);
    }
}

#[tokio::test]
async fn test_heartbeat_silence_removes_connection() {
    let (store, broker) = pipeline(Arc::new(MemoryAlertRepository::new()));
    let (conn, _rx) = broker.connect("parent-1");

    let reaped = broker.reap_stale(Instant::now() + Duration::from_secs(61));
    assert_eq!(reaped, 1);
    assert!(conn.state().is_terminal());
    assert_eq!(broker.connection_count("parent-1"), 0);

    // publish after the reap must not fail, and the alert stays pollable
    store
        .create(
            SessionRef::new("session-1", "parent-1"),
            AlertTrigger::Emergency { reason: None },
        )
        .await
        .unwrap();
    wait_for_dispatch(&store).await;
    assert_eq!(store.list_unresolved("session-1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_persistence_failure_is_surfaced() {
    let (store, _broker) = pipeline(Arc::new(BrokenRepository));

    let err = store
        .create(
            SessionRef::new("session-1", "parent-1"),
            AlertTrigger::Emergency { reason: None },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LookoutError::Persistence(_)));
    assert_eq!(store.pending_notifications(), 0);
}

#[tokio::test]
async fn test_sqlite_store_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("alerts.db");
    let path = path.to_str().unwrap();

    let first_id = {
        let repo = SqliteAlertRepository::open(path).unwrap();
        let (store, _broker) = pipeline(Arc::new(repo));
        let alert = store
            .create(
                SessionRef::new("session-1", "parent-1"),
                AlertTrigger::Emergency { reason: Some("pressed".into()) },
            )
            .await
            .unwrap();
        store.resolve(alert.id).await.unwrap();
        store
            .create(
                SessionRef::new("session-1", "parent-1"),
                AlertTrigger::Activity {
                    activity_type: "gaming".into(),
                    duration_minutes: 150,
                },
            )
            .await
            .unwrap();
        alert.id
    };

    let repo = SqliteAlertRepository::open(path).unwrap();
    let (store, _broker) = pipeline(Arc::new(repo));

    let history = store.list_for_session("session-1").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, first_id);
    assert!(history[0].resolved);
    assert_eq!(history[0].context.as_deref(), Some("pressed"));
    assert!(!history[1].resolved);

    let err = store
        .create(
            SessionRef::new("session-1", "parent-2"),
            AlertTrigger::Emergency { reason: None },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LookoutError::Conflict(_)));

    let again = store.resolve(first_id).await.unwrap();
    assert_eq!(again.resolved_at, history[0].resolved_at);
}

/// Test that concurrent creates on one session reach a connection in id order
#[tokio::test]
async fn test_concurrent_creates_are_pushed_in_id_order() {
    let repo = LaggingRepository {
        inner: MemoryAlertRepository::new(),
        inserts: AtomicUsize::new(0),
    };
    let (store, broker) = pipeline(Arc::new(repo));
    let (_conn, mut rx) = broker.connect("parent-1");

    let manual = |message: &str| AlertTrigger::Manual {
        level: AlertLevel::Warning,
        message: message.to_string(),
        context: None,
        assessment_detail: None,
    };

    let first = {
        let store = Arc::clone(&store);
        let trigger = manual("first");
        tokio::spawn(async move { store.create(SessionRef::new("session-1", "parent-1"), trigger).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = {
        let store = Arc::clone(&store);
        let trigger = manual("second");
        tokio::spawn(async move { store.create(SessionRef::new("session-1", "parent-1"), trigger).await })
    };

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    assert!(first.id < second.id);
    wait_for_dispatch(&store).await;

    let mut delivered = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        if let PushMessage::Alert { message, timestamp, .. } = decode(frame) {
            delivered.push((message, timestamp));
        }
    }
    let messages: Vec<&str> = delivered.iter().map(|(m, _)| m.as_str()).collect();
    assert_eq!(messages, vec!["first", "second"]);
    assert!(delivered[0].1 < delivered[1].1);
}
