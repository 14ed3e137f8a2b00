//! Alert row operations

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::alerts::model::{check_binding, micros_to_datetime, next_created_at};
use crate::alerts::{Alert, AlertLevel, NewAlert};
use crate::types::Result;

const ALERT_COLUMNS: &str = "id, session_id, guardian_id, alert_level, message, context, \
     assessment_detail, requires_action, guardian_notified, resolved, created_at, resolved_at";

fn conversion_error(idx: usize, ty: Type, what: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, what.to_string().into())
}

fn timestamp_at(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let micros: i64 = row.get(idx)?;
    micros_to_datetime(micros).ok_or_else(|| conversion_error(idx, Type::Integer, "timestamp out of range"))
}

fn alert_from_row(row: &Row) -> rusqlite::Result<Alert> {
    let level: String = row.get(3)?;
    let alert_level =
        AlertLevel::parse(&level).ok_or_else(|| conversion_error(3, Type::Text, "unknown alert level"))?;

    let resolved_at = match row.get::<_, Option<i64>>(11)? {
        Some(_) => Some(timestamp_at(row, 11)?),
        None => None,
    };

    Ok(Alert {
        id: row.get(0)?,
        session_id: row.get(1)?,
        guardian_id: row.get(2)?,
        alert_level,
        message: row.get(4)?,
        context: row.get(5)?,
        assessment_detail: row.get(6)?,
        requires_action: row.get(7)?,
        guardian_notified: row.get(8)?,
        resolved: row.get(9)?,
        created_at: timestamp_at(row, 10)?,
        resolved_at,
    })
}

/// Insert an alert inside one transaction: binding check, `created_at`
/// assignment and row insert happen together.
pub fn insert_alert(conn: &mut Connection, new: NewAlert, now: DateTime<Utc>) -> Result<Alert> {
    let tx = conn.transaction()?;

    let session: Option<(String, i64)> = tx
        .query_row(
            "SELECT guardian_id, last_created_at FROM sessions WHERE session_id = ?1",
            params![new.session_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    check_binding(&new.session_id, session.as_ref().map(|(g, _)| g.as_str()), &new.guardian_id)?;

    let previous = session.and_then(|(_, last)| micros_to_datetime(last));
    let created_at = next_created_at(now, previous);
    let created_micros = created_at.timestamp_micros();

    tx.execute(
        "INSERT INTO sessions (session_id, guardian_id, last_created_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(session_id) DO UPDATE SET last_created_at = excluded.last_created_at",
        params![new.session_id, new.guardian_id, created_micros],
    )?;

    tx.execute(
        "INSERT INTO alerts (session_id, guardian_id, alert_level, message, context,
                             assessment_detail, requires_action, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            new.session_id,
            new.guardian_id,
            new.alert_level.as_str(),
            new.message,
            new.context,
            new.assessment_detail,
            new.requires_action,
            created_micros,
        ],
    )?;
    let id = tx.last_insert_rowid();
    tx.commit()?;

    Ok(new.into_alert(id, created_at))
}

pub fn get_alert(conn: &Connection, alert_id: i64) -> Result<Option<Alert>> {
    let alert = conn
        .query_row(
            &format!("SELECT {} FROM alerts WHERE id = ?1", ALERT_COLUMNS),
            params![alert_id],
            alert_from_row,
        )
        .optional()?;
    Ok(alert)
}

/// Set `resolved` once; a second call leaves `resolved_at` untouched
pub fn resolve_alert(conn: &Connection, alert_id: i64, at: DateTime<Utc>) -> Result<Option<Alert>> {
    conn.execute(
        "UPDATE alerts SET resolved = 1, resolved_at = ?2 WHERE id = ?1 AND resolved = 0",
        params![alert_id, at.timestamp_micros()],
    )?;
    get_alert(conn, alert_id)
}

pub fn mark_notified(conn: &Connection, alert_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE alerts SET guardian_notified = 1 WHERE id = ?1",
        params![alert_id],
    )?;
    Ok(())
}

pub fn list_for_session(conn: &Connection, session_id: &str, unresolved_only: bool) -> Result<Vec<Alert>> {
    let sql = format!(
        "SELECT {} FROM alerts WHERE session_id = ?1 {} ORDER BY id ASC",
        ALERT_COLUMNS,
        if unresolved_only { "AND resolved = 0" } else { "" }
    );
    let mut stmt = conn.prepare(&sql)?;
    let alerts = stmt
        .query_map(params![session_id], alert_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(alerts)
}

pub fn list_unresolved_for_guardian(conn: &Connection, guardian_id: &str) -> Result<Vec<Alert>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM alerts WHERE guardian_id = ?1 AND resolved = 0 ORDER BY id ASC",
        ALERT_COLUMNS
    ))?;
    let alerts = stmt
        .query_map(params![guardian_id], alert_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(alerts)
}

pub fn guardian_for_session(conn: &Connection, session_id: &str) -> Result<Option<String>> {
    let guardian = conn
        .query_row(
            "SELECT guardian_id FROM sessions WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(guardian)
}

pub fn unresolved_count(conn: &Connection) -> Result<u64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM alerts WHERE resolved = 0", [], |row| row.get(0))?;
    Ok(count as u64)
}
