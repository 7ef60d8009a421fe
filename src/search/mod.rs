//! Free-text memory search
//!
//! Matching is a case-insensitive substring test over `key` and `value`.
//! There is no tokenization or relevance ranking: results are the live
//! memories that contain the query, most recently updated first.

use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::expiration::LIVE_PREDICATE;
use crate::storage::queries::{memory_from_row, MEMORY_COLUMNS};
use crate::storage::{format_ts, Store};
use crate::types::{Memory, DEFAULT_LIST_LIMIT};

/// Options for a memory search
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchOptions {
    pub query: String,
    /// Exact, case-sensitive category filter
    pub category: Option<String>,
    pub limit: Option<u32>,
}

impl SearchOptions {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Lowercased, trimmed query; `None` when nothing is left to search for
pub fn fold_query(query: &str) -> Option<String> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

/// In-process form of the SQL match, for already-loaded memories
pub fn matches_query(memory: &Memory, folded_query: &str) -> bool {
    memory.key.to_lowercase().contains(folded_query)
        || memory.value.to_lowercase().contains(folded_query)
}

/// Search live memories
///
/// An empty or whitespace-only query returns no results without touching
/// the database.
pub fn search_memories(conn: &Connection, options: &SearchOptions) -> Result<Vec<Memory>> {
    let Some(folded) = fold_query(&options.query) else {
        return Ok(Vec::new());
    };

    let now = format_ts(&Utc::now());
    let mut conditions = vec![
        LIVE_PREDICATE.to_string(),
        "(contains_folded(key, ?) OR contains_folded(value, ?))".to_string(),
    ];
    let mut params: Vec<Box<dyn rusqlite::ToSql>> =
        vec![Box::new(now), Box::new(folded.clone()), Box::new(folded)];

    if let Some(ref category) = options.category {
        conditions.push("category = ?".to_string());
        params.push(Box::new(category.clone()));
    }

    let sql = format!(
        "SELECT {} FROM memories WHERE {} ORDER BY updated_at DESC, id DESC LIMIT {}",
        MEMORY_COLUMNS,
        conditions.join(" AND "),
        options.limit.unwrap_or(DEFAULT_LIST_LIMIT)
    );

    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|b| b.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let memories = stmt
        .query_map(param_refs.as_slice(), memory_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    tracing::debug!(results = memories.len(), "Memory search");
    Ok(memories)
}

impl Store {
    pub async fn search_memories(&self, options: SearchOptions) -> Result<Vec<Memory>> {
        if fold_query(&options.query).is_none() {
            return Ok(Vec::new());
        }
        self.with_connection(move |conn| search_memories(conn, &options))
            .await
    }
}
