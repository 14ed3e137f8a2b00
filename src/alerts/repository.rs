//! Alert persistence seam
//!
//! `AlertRepository` owns identity, ordering and the session binding.
//! Implementations must assign `id` and `created_at` under one write lock
//! so both orders agree for every session.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use super::model::{check_binding, next_created_at, Alert, NewAlert};
use crate::types::{LookoutError, Result};

#[async_trait]
pub trait AlertRepository: Send + Sync {
    /// Persist a new alert, binding the session to its guardian on first use
    async fn insert(&self, alert: NewAlert) -> Result<Alert>;

    async fn get(&self, alert_id: i64) -> Result<Option<Alert>>;

    /// Mark resolved. Already-resolved alerts keep their original
    /// `resolved_at`. `None` when the id is unknown.
    async fn resolve(&self, alert_id: i64, at: DateTime<Utc>) -> Result<Option<Alert>>;

    /// Record that the broker attempted delivery
    async fn mark_notified(&self, alert_id: i64) -> Result<()>;

    /// Alerts of a session ordered by id (equivalently `created_at`)
    async fn list_for_session(&self, session_id: &str, unresolved_only: bool) -> Result<Vec<Alert>>;

    /// Unresolved alerts across every session of a guardian, ordered by id
    async fn list_unresolved_for_guardian(&self, guardian_id: &str) -> Result<Vec<Alert>>;

    async fn guardian_for_session(&self, session_id: &str) -> Result<Option<String>>;

    async fn unresolved_count(&self) -> Result<u64>;
}

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    alerts: BTreeMap<i64, Alert>,
    sessions: HashMap<String, String>,
    last_created: HashMap<String, DateTime<Utc>>,
}

/// In-memory repository for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryAlertRepository {
    state: Mutex<MemoryState>,
}

impl MemoryAlertRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut MemoryState) -> Result<T>,
    {
        let mut state = self
            .state
            .lock()
            .map_err(|e| LookoutError::Persistence(format!("Lock poisoned: {}", e)))?;
        f(&mut state)
    }
}

#[async_trait]
impl AlertRepository for MemoryAlertRepository {
    async fn insert(&self, alert: NewAlert) -> Result<Alert> {
        self.with_state(|state| {
            let bound = state.sessions.get(&alert.session_id).map(String::as_str);
            check_binding(&alert.session_id, bound, &alert.guardian_id)?;

            let created_at = next_created_at(Utc::now(), state.last_created.get(&alert.session_id).copied());
            state.next_id += 1;
            let id = state.next_id;

            state
                .sessions
                .entry(alert.session_id.clone())
                .or_insert_with(|| alert.guardian_id.clone());
            state.last_created.insert(alert.session_id.clone(), created_at);

            let alert = alert.into_alert(id, created_at);
            state.alerts.insert(id, alert.clone());
            Ok(alert)
        })
    }

    async fn get(&self, alert_id: i64) -> Result<Option<Alert>> {
        self.with_state(|state| Ok(state.alerts.get(&alert_id).cloned()))
    }

    async fn resolve(&self, alert_id: i64, at: DateTime<Utc>) -> Result<Option<Alert>> {
        self.with_state(|state| {
            Ok(state.alerts.get_mut(&alert_id).map(|alert| {
                if !alert.resolved {
                    alert.resolved = true;
                    alert.resolved_at = Some(at);
                }
                alert.clone()
            }))
        })
    }

    async fn mark_notified(&self, alert_id: i64) -> Result<()> {
        self.with_state(|state| {
            if let Some(alert) = state.alerts.get_mut(&alert_id) {
                alert.guardian_notified = true;
            }
            Ok(())
        })
    }

    async fn list_for_session(&self, session_id: &str, unresolved_only: bool) -> Result<Vec<Alert>> {
        self.with_state(|state| {
            Ok(state
                .alerts
                .values()
                .filter(|a| a.session_id == session_id && !(unresolved_only && a.resolved))
                .cloned()
                .collect())
        })
    }

    async fn list_unresolved_for_guardian(&self, guardian_id: &str) -> Result<Vec<Alert>> {
        self.with_state(|state| {
            Ok(state
                .alerts
                .values()
                .filter(|a| a.guardian_id == guardian_id && !a.resolved)
                .cloned()
                .collect())
        })
    }

    async fn guardian_for_session(&self, session_id: &str) -> Result<Option<String>> {
        self.with_state(|state| Ok(state.sessions.get(session_id).cloned()))
    }

    async fn unresolved_count(&self) -> Result<u64> {
        self.with_state(|state| Ok(state.alerts.values().filter(|a| !a.resolved).count() as u64))
    }
}
