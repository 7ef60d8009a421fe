//! Database queries for session context
//!
//! Every statement here is keyed by `session_id`; there is no query that
//! reads context rows across sessions.

use chrono::{Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::connection::{format_ts, parse_ts, Store};
use crate::error::Result;
use crate::types::*;

const SESSION_COLUMNS: &str =
    "id, session_id, context_key, context_value, created_at, updated_at";

/// Parse a session context entry from a database row
pub fn session_context_from_row(row: &Row) -> rusqlite::Result<SessionContext> {
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(SessionContext {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        context_key: row.get("context_key")?,
        context_value: row.get("context_value")?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

/// Insert or replace the value stored under `(session_id, context_key)`
///
/// A single statement resolves the race between two writers of the same pair:
/// whichever commits last wins and exactly one row remains.
pub fn upsert_session_context(
    conn: &Connection,
    session_id: &str,
    context_key: &str,
    context_value: &str,
) -> Result<SessionContext> {
    let now = format_ts(&Utc::now());

    let entry = conn.query_row(
        &format!(
            "INSERT INTO session_context
                (session_id, context_key, context_value, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT (session_id, context_key) DO UPDATE SET
                context_value = excluded.context_value,
                updated_at = MAX(session_context.updated_at, excluded.updated_at)
             RETURNING {}",
            SESSION_COLUMNS
        ),
        params![session_id, context_key, context_value, now],
        session_context_from_row,
    )?;

    tracing::debug!(session_id, context_key, "Session context stored");
    Ok(entry)
}

/// All entries of one session, oldest first
pub fn get_session_context(conn: &Connection, session_id: &str) -> Result<Vec<SessionContext>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM session_context WHERE session_id = ? ORDER BY created_at ASC, id ASC",
        SESSION_COLUMNS
    ))?;
    let entries = stmt
        .query_map(params![session_id], session_context_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

pub fn get_session_value(
    conn: &Connection,
    session_id: &str,
    context_key: &str,
) -> Result<Option<SessionContext>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {} FROM session_context WHERE session_id = ? AND context_key = ?",
                SESSION_COLUMNS
            ),
            params![session_id, context_key],
            session_context_from_row,
        )
        .optional()?)
}

/// Returns `true` if the key existed
pub fn delete_session_key(conn: &Connection, session_id: &str, context_key: &str) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM session_context WHERE session_id = ? AND context_key = ?",
        params![session_id, context_key],
    )?;
    Ok(deleted > 0)
}

/// Remove every key of a session; returns how many were removed
pub fn clear_session(conn: &Connection, session_id: &str) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM session_context WHERE session_id = ?",
        params![session_id],
    )?;
    tracing::debug!(session_id, deleted, "Session cleared");
    Ok(deleted)
}

/// Delete all rows of sessions that have not been written for `idle_for`
pub fn prune_idle_sessions(conn: &Connection, idle_for: Duration) -> Result<usize> {
    let cutoff = format_ts(&retention_cutoff("idle_for", Utc::now(), idle_for)?);

    let deleted = conn.execute(
        "DELETE FROM session_context WHERE session_id IN (
            SELECT session_id FROM session_context
            GROUP BY session_id
            HAVING MAX(updated_at) < ?
         )",
        params![cutoff],
    )?;

    if deleted > 0 {
        tracing::info!(deleted, "Pruned idle session context");
    }
    Ok(deleted)
}

fn validate_pair(session_id: &str, context_key: &str) -> Result<()> {
    require_non_empty("session_id", session_id)?;
    require_non_empty("context_key", context_key)
}

impl Store {
    pub async fn upsert_session_context(
        &self,
        session_id: &str,
        context_key: &str,
        context_value: &str,
    ) -> Result<SessionContext> {
        validate_pair(session_id, context_key)?;
        let (session_id, context_key, context_value) = (
            session_id.to_string(),
            context_key.to_string(),
            context_value.to_string(),
        );
        self.with_transaction(move |conn| {
            upsert_session_context(conn, &session_id, &context_key, &context_value)
        })
        .await
    }

    pub async fn get_session_context(&self, session_id: &str) -> Result<Vec<SessionContext>> {
        require_non_empty("session_id", session_id)?;
        let session_id = session_id.to_string();
        self.with_connection(move |conn| get_session_context(conn, &session_id))
            .await
    }

    pub async fn get_session_value(
        &self,
        session_id: &str,
        context_key: &str,
    ) -> Result<Option<SessionContext>> {
        validate_pair(session_id, context_key)?;
        let (session_id, context_key) = (session_id.to_string(), context_key.to_string());
        self.with_connection(move |conn| get_session_value(conn, &session_id, &context_key))
            .await
    }

    pub async fn delete_session_key(&self, session_id: &str, context_key: &str) -> Result<bool> {
        validate_pair(session_id, context_key)?;
        let (session_id, context_key) = (session_id.to_string(), context_key.to_string());
        self.with_transaction(move |conn| delete_session_key(conn, &session_id, &context_key))
            .await
    }

    pub async fn clear_session(&self, session_id: &str) -> Result<usize> {
        require_non_empty("session_id", session_id)?;
        let session_id = session_id.to_string();
        self.with_transaction(move |conn| clear_session(conn, &session_id))
            .await
    }

    pub async fn prune_idle_sessions(&self, idle_for: Duration) -> Result<usize> {
        retention_cutoff("idle_for", Utc::now(), idle_for)?;
        self.with_transaction(move |conn| prune_idle_sessions(conn, idle_for))
            .await
    }
}
