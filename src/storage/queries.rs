//! Database queries for memory operations

use chrono::{Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::connection::{format_ts, parse_opt_ts, parse_ts, Store};
use super::expiration::LIVE_PREDICATE;
use crate::error::{LearaError, Result};
use crate::types::*;

pub(crate) const MEMORY_COLUMNS: &str =
    "id, key, value, category, priority, metadata, created_at, updated_at, expires_at, is_active";

/// Parse a memory from a database row
pub fn memory_from_row(row: &Row) -> rusqlite::Result<Memory> {
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let metadata_str: Option<String> = row.get("metadata")?;

    let metadata = metadata_str
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })?;

    Ok(Memory {
        id: row.get("id")?,
        key: row.get("key")?,
        value: row.get("value")?,
        category: row.get("category")?,
        priority: row.get("priority")?,
        metadata,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
        expires_at: parse_opt_ts(row.get("expires_at")?)?,
        is_active: row.get("is_active")?,
    })
}

/// Fetch a memory in any state
fn fetch_memory(conn: &Connection, id: MemoryId) -> Result<Memory> {
    conn.query_row(
        &format!("SELECT {} FROM memories WHERE id = ?", MEMORY_COLUMNS),
        params![id],
        memory_from_row,
    )
    .optional()?
    .ok_or_else(|| LearaError::not_found("memory", id))
}

/// Create a new memory
///
/// An `expires_at` in the past is accepted and yields an already-expired row.
pub fn create_memory(conn: &Connection, input: &CreateMemoryInput) -> Result<Memory> {
    let now = format_ts(&Utc::now());
    let category = input.category.as_deref().unwrap_or(DEFAULT_CATEGORY);
    let priority = input.priority.unwrap_or(DEFAULT_PRIORITY);
    let metadata = input
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let expires_at = input.expires_at.as_ref().map(format_ts);

    conn.execute(
        "INSERT INTO memories (key, value, category, priority, metadata,
                               created_at, updated_at, expires_at, is_active)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1)",
        params![
            input.key,
            input.value,
            category,
            priority,
            metadata,
            now,
            now,
            expires_at
        ],
    )?;

    let id = conn.last_insert_rowid();
    tracing::debug!(memory_id = id, category, priority, "Memory created");

    fetch_memory(conn, id)
}

/// Get a live memory by ID
pub fn get_memory(conn: &Connection, id: MemoryId) -> Result<Memory> {
    let now = format_ts(&Utc::now());
    conn.query_row(
        &format!(
            "SELECT {} FROM memories WHERE id = ? AND {}",
            MEMORY_COLUMNS, LIVE_PREDICATE
        ),
        params![id, now],
        memory_from_row,
    )
    .optional()?
    .ok_or_else(|| LearaError::not_found("memory", id))
}

/// Every live memory stored under `key`, most recently updated first
///
/// Keys are not unique, so several memories may come back.
pub fn find_memories_by_key(conn: &Connection, key: &str) -> Result<Vec<Memory>> {
    let now = format_ts(&Utc::now());
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM memories WHERE key = ? AND {} ORDER BY updated_at DESC, id DESC",
        MEMORY_COLUMNS, LIVE_PREDICATE
    ))?;
    let memories = stmt
        .query_map(params![key, now], memory_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(memories)
}

/// Update a memory
///
/// Applies to rows in any state, so an expired or deactivated memory can be
/// revived by moving its expiry or setting `is_active`.
pub fn update_memory(conn: &Connection, id: MemoryId, input: &UpdateMemoryInput) -> Result<Memory> {
    let now = format_ts(&Utc::now());

    let mut updates = vec!["updated_at = MAX(updated_at, ?)".to_string()];
    let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(now)];

    if let Some(ref value) = input.value {
        updates.push("value = ?".to_string());
        values.push(Box::new(value.clone()));
    }

    if let Some(ref category) = input.category {
        updates.push("category = ?".to_string());
        values.push(Box::new(category.clone()));
    }

    if let Some(priority) = input.priority {
        updates.push("priority = ?".to_string());
        values.push(Box::new(priority));
    }

    if let Some(ref metadata) = input.metadata {
        updates.push("metadata = ?".to_string());
        values.push(Box::new(serde_json::to_string(metadata)?));
    }

    if input.clear_expiry {
        updates.push("expires_at = NULL".to_string());
    } else if let Some(ref expires_at) = input.expires_at {
        updates.push("expires_at = ?".to_string());
        values.push(Box::new(format_ts(expires_at)));
    }

    if let Some(is_active) = input.is_active {
        updates.push("is_active = ?".to_string());
        values.push(Box::new(is_active));
    }

    let sql = format!("UPDATE memories SET {} WHERE id = ?", updates.join(", "));
    values.push(Box::new(id));

    let params: Vec<&dyn rusqlite::ToSql> = values.iter().map(|b| b.as_ref()).collect();
    let affected = conn.execute(&sql, params.as_slice())?;
    if affected == 0 {
        return Err(LearaError::not_found("memory", id));
    }

    tracing::debug!(memory_id = id, "Memory updated");
    fetch_memory(conn, id)
}

/// Soft-delete a memory
pub fn deactivate_memory(conn: &Connection, id: MemoryId) -> Result<Memory> {
    update_memory(
        conn,
        id,
        &UpdateMemoryInput {
            is_active: Some(false),
            ..Default::default()
        },
    )
}

/// List live memories with filtering and pagination
///
/// Most recently updated first; `total` counts every match before paging.
pub fn list_memories(conn: &Connection, options: &MemoryListOptions) -> Result<Page<Memory>> {
    let now = format_ts(&Utc::now());

    let mut conditions = vec![LIVE_PREDICATE.to_string()];
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(now)];

    if let Some(ref category) = options.category {
        conditions.push("category = ?".to_string());
        params.push(Box::new(category.clone()));
    }

    if let Some(priority) = options.priority {
        conditions.push("priority = ?".to_string());
        params.push(Box::new(priority));
    }

    let where_clause = conditions.join(" AND ");
    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|b| b.as_ref()).collect();

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM memories WHERE {}", where_clause),
        param_refs.as_slice(),
        |row| row.get(0),
    )?;

    let limit = options.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let offset = options.offset.unwrap_or(0);
    let sql = format!(
        "SELECT {} FROM memories WHERE {}
         ORDER BY updated_at DESC, id DESC
         LIMIT {} OFFSET {}",
        MEMORY_COLUMNS, where_clause, limit, offset
    );

    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map(param_refs.as_slice(), memory_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(Page { items, total })
}

/// Physically delete memories whose expiry lies more than `retention` in
/// the past
///
/// Returns the number of rows removed. A negative `retention` is rejected,
/// since it would reach rows that are still live.
pub fn reap_expired_memories(conn: &Connection, retention: Duration) -> Result<usize> {
    let cutoff = format_ts(&retention_cutoff("retention", Utc::now(), retention)?);

    let deleted = conn.execute(
        "DELETE FROM memories WHERE expires_at IS NOT NULL AND expires_at <= ?",
        params![cutoff],
    )?;

    if deleted > 0 {
        tracing::info!(deleted, "Reaped expired memories");
    }

    Ok(deleted)
}

/// Get row counts for every collection
pub fn get_stats(conn: &Connection) -> Result<StoreStats> {
    let now = format_ts(&Utc::now());

    let (live_memories, expired_memories, inactive_memories): (i64, i64, i64) = conn.query_row(
        "SELECT
            COALESCE(SUM(CASE WHEN is_active = 1 AND (expires_at IS NULL OR expires_at > ?1)
                              THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN is_active = 1 AND expires_at <= ?1
                              THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN is_active = 0 THEN 1 ELSE 0 END), 0)
         FROM memories",
        params![now],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;

    let count_status = |status: TaskStatus| -> rusqlite::Result<i64> {
        conn.query_row(
            "SELECT COUNT(*) FROM tasks WHERE status = ?",
            params![status.as_str()],
            |row| row.get(0),
        )
    };

    let count = |sql: &str| -> rusqlite::Result<i64> { conn.query_row(sql, [], |row| row.get(0)) };

    Ok(StoreStats {
        live_memories,
        expired_memories,
        inactive_memories,
        pending_tasks: count_status(TaskStatus::Pending)?,
        in_progress_tasks: count_status(TaskStatus::InProgress)?,
        completed_tasks: count_status(TaskStatus::Completed)?,
        conversations: count("SELECT COUNT(*) FROM conversations")?,
        messages: count("SELECT COUNT(*) FROM messages")?,
        sessions: count("SELECT COUNT(DISTINCT session_id) FROM session_context")?,
        session_keys: count("SELECT COUNT(*) FROM session_context")?,
    })
}

impl Store {
    /// Create a memory; input is validated before a connection is acquired
    pub async fn create_memory(&self, input: CreateMemoryInput) -> Result<Memory> {
        input.validate()?;
        self.with_transaction(move |conn| create_memory(conn, &input))
            .await
    }

    pub async fn get_memory(&self, id: MemoryId) -> Result<Memory> {
        self.with_connection(move |conn| get_memory(conn, id)).await
    }

    pub async fn find_memories_by_key(&self, key: &str) -> Result<Vec<Memory>> {
        require_non_empty("key", key)?;
        let key = key.to_string();
        self.with_connection(move |conn| find_memories_by_key(conn, &key))
            .await
    }

    pub async fn update_memory(&self, id: MemoryId, input: UpdateMemoryInput) -> Result<Memory> {
        input.validate()?;
        self.with_transaction(move |conn| update_memory(conn, id, &input))
            .await
    }

    pub async fn deactivate_memory(&self, id: MemoryId) -> Result<Memory> {
        self.with_transaction(move |conn| deactivate_memory(conn, id))
            .await
    }

    pub async fn list_memories(&self, options: MemoryListOptions) -> Result<Page<Memory>> {
        if let Some(priority) = options.priority {
            validate_priority(priority)?;
        }
        self.with_connection(move |conn| list_memories(conn, &options))
            .await
    }

    pub async fn reap_expired_memories(&self, retention: Duration) -> Result<usize> {
        retention_cutoff("retention", Utc::now(), retention)?;
        self.with_transaction(move |conn| reap_expired_memories(conn, retention))
            .await
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.with_connection(|conn| get_stats(conn)).await
    }
}

/// Timestamp helper shared by tests of sibling query modules
#[cfg(test)]
pub(crate) fn backdate(conn: &Connection, table: &str, column: &str, id: i64, at: chrono::DateTime<Utc>) {
    conn.execute(
        &format!("UPDATE {} SET {} = ? WHERE id = ?", table, column),
        params![format_ts(&at), id],
    )
    .unwrap();
}
