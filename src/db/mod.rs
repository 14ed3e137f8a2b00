//! SQLite alert persistence
//!
//! ## Tables
//!
//! - `sessions` - session → guardian binding and the last `created_at`
//! - `alerts` - every alert ever created; rows are never deleted
//!
//! The connection sits behind a `std::sync::Mutex`, which also serializes
//! id and timestamp assignment. Async callers go through
//! `SqliteAlertRepository`, which runs each call on the blocking pool.

pub mod alerts;
pub mod schema;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::alerts::{Alert, AlertRepository, NewAlert};
use crate::types::{LookoutError, Result};

/// Path value that selects an ephemeral in-memory database
pub const IN_MEMORY: &str = ":memory:";

/// SQLite database for alerts
pub struct AlertDb {
    conn: Mutex<Connection>,
}

impl AlertDb {
    /// Open or create the alert database (`:memory:` for an ephemeral one)
    pub fn open(path: &str) -> Result<Self> {
        if path == IN_MEMORY {
            return Self::open_in_memory();
        }

        info!("Opening SQLite database at {:?}", Path::new(path));
        let conn = Connection::open(path)
            .map_err(|e| LookoutError::Persistence(format!("Failed to open SQLite: {}", e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| LookoutError::Persistence(format!("Failed to set PRAGMA: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(schema::init_schema)?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory()
            .map_err(|e| LookoutError::Persistence(format!("Failed to open in-memory SQLite: {}", e)))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(schema::init_schema)?;
        Ok(db)
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| LookoutError::Persistence(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Execute a write operation with exclusive access
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| LookoutError::Persistence(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }
}

/// `AlertRepository` over `AlertDb`
#[derive(Clone)]
pub struct SqliteAlertRepository {
    db: Arc<AlertDb>,
}

impl SqliteAlertRepository {
    pub fn new(db: AlertDb) -> Self {
        Self { db: Arc::new(db) }
    }

    pub fn open(path: &str) -> Result<Self> {
        AlertDb::open(path).map(Self::new)
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&AlertDb) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db)).await?
    }
}

#[async_trait]
impl AlertRepository for SqliteAlertRepository {
    async fn insert(&self, alert: NewAlert) -> Result<Alert> {
        self.blocking(move |db| db.with_conn_mut(|conn| alerts::insert_alert(conn, alert, Utc::now())))
            .await
    }

    async fn get(&self, alert_id: i64) -> Result<Option<Alert>> {
        self.blocking(move |db| db.with_conn(|conn| alerts::get_alert(conn, alert_id)))
            .await
    }

    async fn resolve(&self, alert_id: i64, at: DateTime<Utc>) -> Result<Option<Alert>> {
        self.blocking(move |db| db.with_conn(|conn| alerts::resolve_alert(conn, alert_id, at)))
            .await
    }

    async fn mark_notified(&self, alert_id: i64) -> Result<()> {
        self.blocking(move |db| db.with_conn(|conn| alerts::mark_notified(conn, alert_id)))
            .await
    }

    async fn list_for_session(&self, session_id: &str, unresolved_only: bool) -> Result<Vec<Alert>> {
        let session_id = session_id.to_string();
        self.blocking(move |db| {
            db.with_conn(|conn| alerts::list_for_session(conn, &session_id, unresolved_only))
        })
        .await
    }

    async fn list_unresolved_for_guardian(&self, guardian_id: &str) -> Result<Vec<Alert>> {
        let guardian_id = guardian_id.to_string();
        self.blocking(move |db| {
            db.with_conn(|conn| alerts::list_unresolved_for_guardian(conn, &guardian_id))
        })
        .await
    }

    async fn guardian_for_session(&self, session_id: &str) -> Result<Option<String>> {
        let session_id = session_id.to_string();
        self.blocking(move |db| db.with_conn(|conn| alerts::guardian_for_session(conn, &session_id)))
            .await
    }

    async fn unresolved_count(&self) -> Result<u64> {
        self.blocking(|db| db.with_conn(alerts::unresolved_count)).await
    }
}
