//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::types::{LookoutError, Result};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        conn.execute_batch(ALERTS_SCHEMA)
            .map_err(|e| LookoutError::Persistence(format!("Failed to create alert tables: {}", e)))?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (id INTEGER PRIMARY KEY CHECK (id = 1), version INTEGER NOT NULL)",
        [],
    )
    .map_err(|e| LookoutError::Persistence(format!("Failed to create schema_version table: {}", e)))?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_version (id, version) VALUES (1, ?1)
         ON CONFLICT(id) DO UPDATE SET version = excluded.version",
        [version],
    )
    .map_err(|e| LookoutError::Persistence(format!("Failed to set schema_version: {}", e)))?;
    Ok(())
}

/// Sessions bind to one guardian; alerts are append-only apart from the
/// notified/resolved flags. Timestamps are microseconds since the epoch.
const ALERTS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    guardian_id TEXT NOT NULL,
    last_created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS alerts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL REFERENCES sessions(session_id),
    guardian_id TEXT NOT NULL,
    alert_level TEXT NOT NULL CHECK (alert_level IN ('info', 'warning', 'urgent', 'emergency')),
    message TEXT NOT NULL,
    context TEXT,
    assessment_detail TEXT,
    requires_action INTEGER NOT NULL,
    guardian_notified INTEGER NOT NULL DEFAULT 0,
    resolved INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    resolved_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_alerts_session ON alerts(session_id, id);
CREATE INDEX IF NOT EXISTS idx_alerts_guardian_open ON alerts(guardian_id, resolved, id);
"#;
