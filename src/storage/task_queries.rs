//! Database queries for task operations

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::connection::{format_ts, parse_opt_ts, parse_ts, Store};
use crate::error::{LearaError, Result};
use crate::types::*;

const TASK_COLUMNS: &str = "id, title, description, status, priority, due_date, created_at,
     updated_at, completed_at, context, tags";

/// Priority first, then earliest due date with undated tasks last, then
/// creation order; `id` makes pagination reproducible
const TASK_ORDER: &str =
    "priority DESC, due_date IS NULL, due_date ASC, created_at ASC, id ASC";

/// Parse a task from a database row
pub fn task_from_row(row: &Row) -> rusqlite::Result<Task> {
    let status_str: String = row.get("status")?;
    let status = status_str.parse().map_err(|e: LearaError| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(Task {
        id: row.get("id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        status,
        priority: row.get("priority")?,
        due_date: parse_opt_ts(row.get("due_date")?)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
        completed_at: parse_opt_ts(row.get("completed_at")?)?,
        context: row.get("context")?,
        tags: row.get("tags")?,
    })
}

/// Create a new task in `pending` state
pub fn create_task(conn: &Connection, input: &CreateTaskInput) -> Result<Task> {
    let now = format_ts(&Utc::now());
    let priority = input.priority.unwrap_or(DEFAULT_PRIORITY);
    let due_date = input.due_date.as_ref().map(format_ts);

    conn.execute(
        "INSERT INTO tasks (title, description, status, priority, due_date,
                            created_at, updated_at, context, tags)
         VALUES (?, ?, 'pending', ?, ?, ?, ?, ?, ?)",
        params![
            input.title,
            input.description,
            priority,
            due_date,
            now,
            now,
            input.context,
            input.tags
        ],
    )?;

    let id = conn.last_insert_rowid();
    tracing::debug!(task_id = id, priority, "Task created");

    get_task(conn, id)
}

/// Get a task by ID
pub fn get_task(conn: &Connection, id: TaskId) -> Result<Task> {
    conn.query_row(
        &format!("SELECT {} FROM tasks WHERE id = ?", TASK_COLUMNS),
        params![id],
        task_from_row,
    )
    .optional()?
    .ok_or_else(|| LearaError::not_found("task", id))
}

/// Move a task to `status`
///
/// Entering `completed` stamps `completed_at` (an existing stamp is kept when
/// the task was already completed); any other status clears it.
pub fn update_task_status(conn: &Connection, id: TaskId, status: TaskStatus) -> Result<Task> {
    let now = format_ts(&Utc::now());

    let affected = conn.execute(
        "UPDATE tasks SET
            status = ?1,
            updated_at = MAX(updated_at, ?2),
            completed_at = CASE WHEN ?1 = 'completed'
                                THEN COALESCE(completed_at, ?2)
                                ELSE NULL END
         WHERE id = ?3",
        params![status.as_str(), now, id],
    )?;

    if affected == 0 {
        return Err(LearaError::not_found("task", id));
    }

    tracing::debug!(task_id = id, status = %status, "Task status updated");
    get_task(conn, id)
}

/// List tasks with filtering and pagination
pub fn list_tasks(conn: &Connection, options: &TaskListOptions) -> Result<Page<Task>> {
    let mut conditions: Vec<String> = vec![];
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];

    if let Some(status) = options.status {
        conditions.push("status = ?".to_string());
        params.push(Box::new(status.as_str()));
    }

    if let Some(priority) = options.priority {
        conditions.push("priority = ?".to_string());
        params.push(Box::new(priority));
    }

    if let Some(ref due_before) = options.due_before {
        conditions.push("due_date IS NOT NULL AND due_date < ?".to_string());
        params.push(Box::new(format_ts(due_before)));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };
    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|b| b.as_ref()).collect();

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM tasks{}", where_clause),
        param_refs.as_slice(),
        |row| row.get(0),
    )?;

    let limit = options.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let offset = options.offset.unwrap_or(0);
    let sql = format!(
        "SELECT {} FROM tasks{} ORDER BY {} LIMIT {} OFFSET {}",
        TASK_COLUMNS, where_clause, TASK_ORDER, limit, offset
    );

    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map(param_refs.as_slice(), task_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(Page { items, total })
}

/// Tasks not yet completed, in list order
pub fn pending_tasks(conn: &Connection, limit: u32) -> Result<Vec<Task>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM tasks WHERE status != 'completed' ORDER BY {} LIMIT ?",
        TASK_COLUMNS, TASK_ORDER
    ))?;
    let tasks = stmt
        .query_map(params![limit], task_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tasks)
}

impl Store {
    pub async fn create_task(&self, input: CreateTaskInput) -> Result<Task> {
        input.validate()?;
        self.with_transaction(move |conn| create_task(conn, &input))
            .await
    }

    pub async fn get_task(&self, id: TaskId) -> Result<Task> {
        self.with_connection(move |conn| get_task(conn, id)).await
    }

    pub async fn update_task_status(&self, id: TaskId, status: TaskStatus) -> Result<Task> {
        self.with_transaction(move |conn| update_task_status(conn, id, status))
            .await
    }

    /// Like [`Store::update_task_status`], parsing the status name first
    pub async fn update_task_status_str(&self, id: TaskId, status: &str) -> Result<Task> {
        let status: TaskStatus = status.parse()?;
        self.update_task_status(id, status).await
    }

    pub async fn list_tasks(&self, options: TaskListOptions) -> Result<Page<Task>> {
        if let Some(priority) = options.priority {
            validate_priority(priority)?;
        }
        if let Some(ref due_before) = options.due_before {
            validate_timestamp("due_before", due_before)?;
        }
        self.with_connection(move |conn| list_tasks(conn, &options))
            .await
    }

    pub async fn pending_tasks(&self, limit: u32) -> Result<Vec<Task>> {
        self.with_connection(move |conn| pending_tasks(conn, limit))
            .await
    }
}
