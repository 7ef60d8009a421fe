//! Core types for Leara

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LearaError, Result};

/// Unique identifier for a memory
pub type MemoryId = i64;
/// Unique identifier for a task
pub type TaskId = i64;
/// Unique identifier for a session context row
pub type SessionContextId = i64;
/// Unique identifier for a conversation
pub type ConversationId = Uuid;
/// Unique identifier for a chat message
pub type MessageId = Uuid;

/// Lowest accepted priority
pub const MIN_PRIORITY: i32 = 1;
/// Highest accepted priority
pub const MAX_PRIORITY: i32 = 5;
/// Priority used when the caller does not supply one
pub const DEFAULT_PRIORITY: i32 = 3;
/// Category used when the caller does not supply one
pub const DEFAULT_CATEGORY: &str = "general";
/// Page size used when a list call does not supply a limit
pub const DEFAULT_LIST_LIMIT: u32 = 50;

/// A durable fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: MemoryId,
    /// Lookup key, not unique: several memories may share one
    pub key: String,
    pub value: String,
    /// Free-form classification (e.g. "general", "preference", "project")
    pub category: String,
    /// 1-5, 5 is highest
    pub priority: i32,
    /// Opaque structured payload
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

/// Input for creating a memory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateMemoryInput {
    pub key: String,
    pub value: String,
    pub category: Option<String>,
    pub priority: Option<i32>,
    pub metadata: Option<serde_json::Value>,
    /// May already lie in the past, which simply creates an expired memory
    pub expires_at: Option<DateTime<Utc>>,
}

impl CreateMemoryInput {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ..Default::default()
        }
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn validate(&self) -> Result<()> {
        require_non_empty("key", &self.key)?;
        require_non_empty("value", &self.value)?;
        if let Some(ref category) = self.category {
            require_non_empty("category", category)?;
        }
        if let Some(priority) = self.priority {
            validate_priority(priority)?;
        }
        if let Some(ref expires_at) = self.expires_at {
            validate_timestamp("expires_at", expires_at)?;
        }
        Ok(())
    }
}

/// Partial update of a memory; `None` leaves a field untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateMemoryInput {
    pub value: Option<String>,
    pub category: Option<String>,
    pub priority: Option<i32>,
    pub metadata: Option<serde_json::Value>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Remove any expiry; wins over `expires_at`
    #[serde(default)]
    pub clear_expiry: bool,
    pub is_active: Option<bool>,
}

impl UpdateMemoryInput {
    pub fn validate(&self) -> Result<()> {
        if let Some(ref value) = self.value {
            require_non_empty("value", value)?;
        }
        if let Some(ref category) = self.category {
            require_non_empty("category", category)?;
        }
        if let Some(priority) = self.priority {
            validate_priority(priority)?;
        }
        if let Some(ref expires_at) = self.expires_at {
            validate_timestamp("expires_at", expires_at)?;
        }
        Ok(())
    }
}

/// Options for listing live memories
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryListOptions {
    /// Exact, case-sensitive match
    pub category: Option<String>,
    pub priority: Option<i32>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// One page of results plus the filtered count before pagination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
}

/// Task lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 3] = [
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = LearaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            _ => Err(LearaError::Validation(format!(
                "Unknown task status: {:?} (expected pending, in_progress or completed)",
                s
            ))),
        }
    }
}

/// An actionable item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: i32,
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set exactly while status is `completed`
    pub completed_at: Option<DateTime<Utc>>,
    /// Free text, e.g. where the task came from
    pub context: Option<String>,
    /// Comma-delimited tags
    pub tags: Option<String>,
}

/// Input for creating a task
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTaskInput {
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<i32>,
    pub due_date: Option<DateTime<Utc>>,
    pub context: Option<String>,
    pub tags: Option<String>,
}

impl CreateTaskInput {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn due_date(mut self, due_date: DateTime<Utc>) -> Self {
        self.due_date = Some(due_date);
        self
    }

    pub fn validate(&self) -> Result<()> {
        require_non_empty("title", &self.title)?;
        if let Some(priority) = self.priority {
            validate_priority(priority)?;
        }
        if let Some(ref due_date) = self.due_date {
            validate_timestamp("due_date", due_date)?;
        }
        Ok(())
    }
}

/// Options for listing tasks
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskListOptions {
    pub status: Option<TaskStatus>,
    pub priority: Option<i32>,
    /// Only tasks due strictly before this instant
    pub due_before: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Transient key/value fact bound to one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    pub id: SessionContextId,
    pub session_id: String,
    pub context_key: String,
    pub context_value: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Who wrote a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Sender {
    type Err = LearaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Sender::User),
            "assistant" => Ok(Sender::Assistant),
            _ => Err(LearaError::Validation(format!("Unknown sender: {:?}", s))),
        }
    }
}

/// A chat thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Always equal to the number of stored messages of this conversation
    pub message_count: i64,
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub content: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
}

/// Row counts across all record collections
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub live_memories: i64,
    pub expired_memories: i64,
    pub inactive_memories: i64,
    pub pending_tasks: i64,
    pub in_progress_tasks: i64,
    pub completed_tasks: i64,
    pub conversations: i64,
    pub messages: i64,
    pub sessions: i64,
    pub session_keys: i64,
}

/// Configuration for the storage engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database, or ":memory:" for an isolated in-memory store
    pub db_path: String,
    #[serde(default)]
    pub journal_mode: JournalMode,
    /// Maximum number of pooled connections
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Upper bound on waiting for a pooled connection
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_ms: u64,
    /// How long SQLite retries a locked database before giving up
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

impl StorageConfig {
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            journal_mode: JournalMode::default(),
            pool_size: default_pool_size(),
            acquire_timeout_ms: default_acquire_timeout(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(IN_MEMORY_PATH)
    }

    pub fn is_in_memory(&self) -> bool {
        self.db_path == IN_MEMORY_PATH
    }
}

/// Path value selecting an in-memory database
pub const IN_MEMORY_PATH: &str = ":memory:";

fn default_pool_size() -> usize {
    8
}

fn default_acquire_timeout() -> u64 {
    5000
}

fn default_busy_timeout() -> u64 {
    5000
}

/// SQLite journal mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    /// Write-ahead log: readers never block the single writer
    #[default]
    Wal,
    /// Rollback journal, for filesystems where WAL is unsafe (network/cloud folders)
    Delete,
}

impl std::str::FromStr for JournalMode {
    type Err = LearaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "wal" => Ok(JournalMode::Wal),
            "delete" => Ok(JournalMode::Delete),
            _ => Err(LearaError::Config(format!("Unknown journal mode: {}", s))),
        }
    }
}

/// How much material the summary engine gathers
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SummaryConfig {
    /// Most recently updated live memories to include
    #[serde(default = "default_summary_memories")]
    pub memory_limit: u32,
    /// Most recent conversation messages to include
    #[serde(default = "default_summary_messages")]
    pub message_limit: u32,
    /// Pending tasks to include
    #[serde(default = "default_summary_tasks")]
    pub task_limit: u32,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            memory_limit: default_summary_memories(),
            message_limit: default_summary_messages(),
            task_limit: default_summary_tasks(),
        }
    }
}

fn default_summary_memories() -> u32 {
    20
}

fn default_summary_messages() -> u32 {
    20
}

fn default_summary_tasks() -> u32 {
    10
}

/// Reject priorities outside 1-5
pub fn validate_priority(priority: i32) -> Result<()> {
    if (MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        Ok(())
    } else {
        Err(LearaError::Validation(format!(
            "priority must be between {} and {}, got {}",
            MIN_PRIORITY, MAX_PRIORITY, priority
        )))
    }
}

/// Reject empty or whitespace-only strings
pub fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(LearaError::Validation(format!("{} must not be empty", field)))
    } else {
        Ok(())
    }
}

/// Reject instants outside years 0-9999
///
/// Stored timestamps are compared as strings; only four-digit years keep
/// the fixed width that makes string order equal time order.
pub fn validate_timestamp(field: &str, ts: &DateTime<Utc>) -> Result<()> {
    if (0..=9999).contains(&ts.year()) {
        Ok(())
    } else {
        Err(LearaError::Validation(format!(
            "{} must fall between years 0 and 9999, got {}",
            field, ts
        )))
    }
}

/// Reject negative retention windows and compute `now - retention`
///
/// A negative window would put the cutoff in the future and select rows that
/// are still current.
pub fn retention_cutoff(field: &str, now: DateTime<Utc>, retention: Duration) -> Result<DateTime<Utc>> {
    if retention < Duration::zero() {
        return Err(LearaError::Validation(format!(
            "{} must not be negative",
            field
        )));
    }
    now.checked_sub_signed(retention)
        .filter(|cutoff| (0..=9999).contains(&cutoff.year()))
        .ok_or_else(|| LearaError::Validation(format!("{} is out of range", field)))
}

/// Whole days as a retention window, rejecting out-of-range values
pub fn retention_days(days: i64) -> Result<Duration> {
    Duration::try_days(days)
        .ok_or_else(|| LearaError::Validation(format!("{} days is out of range", days)))
}

/// Whole hours as a time-to-live, rejecting out-of-range values
pub fn ttl_hours(hours: i64) -> Result<Duration> {
    Duration::try_hours(hours)
        .ok_or_else(|| LearaError::Validation(format!("{} hours is out of range", hours)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_task_status_round_trip_names() {
        for status in TaskStatus::ALL {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!(matches!(
            "done".parse::<TaskStatus>(),
            Err(LearaError::Validation(_))
        ));
        assert!("Completed".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_task_status_serde_names() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }

    #[test]
    fn test_create_memory_validation() {
        assert!(CreateMemoryInput::new("fav_color", "teal").validate().is_ok());
        assert!(CreateMemoryInput::new("fav_color", "  ").validate().is_err());
        assert!(CreateMemoryInput::new("", "teal").validate().is_err());
        assert!(CreateMemoryInput::new("k", "v").priority(0).validate().is_err());
        assert!(CreateMemoryInput::new("k", "v").priority(6).validate().is_err());
        assert!(CreateMemoryInput::new("k", "v").priority(5).validate().is_ok());
    }

    #[test]
    fn test_create_task_validation() {
        assert!(CreateTaskInput::new("Call John").validate().is_ok());
        assert!(CreateTaskInput::new("").validate().is_err());
        assert!(CreateTaskInput::new("x").priority(9).validate().is_err());
    }

    #[test]
    fn test_five_digit_years_rejected() {
        let last = Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap();
        let beyond = Utc.with_ymd_and_hms(10000, 1, 1, 0, 0, 0).unwrap();

        assert!(CreateMemoryInput::new("k", "v").expires_at(last).validate().is_ok());
        assert!(matches!(
            CreateMemoryInput::new("k", "v").expires_at(beyond).validate(),
            Err(LearaError::Validation(_))
        ));
        let update = UpdateMemoryInput {
            expires_at: Some(beyond),
            ..Default::default()
        };
        assert!(matches!(update.validate(), Err(LearaError::Validation(_))));
        assert!(matches!(
            CreateTaskInput::new("x").due_date(beyond).validate(),
            Err(LearaError::Validation(_))
        ));
    }

    #[test]
    fn test_retention_cutoff_bounds() {
        let now = Utc::now();
        assert_eq!(
            retention_cutoff("retention", now, Duration::days(30)).unwrap(),
            now - Duration::days(30)
        );
        assert_eq!(retention_cutoff("retention", now, Duration::zero()).unwrap(), now);
        assert!(matches!(
            retention_cutoff("retention", now, Duration::days(-1)),
            Err(LearaError::Validation(_))
        ));
        assert!(matches!(
            retention_cutoff("retention", now, Duration::days(1_000_000_000)),
            Err(LearaError::Validation(_))
        ));
    }

    #[test]
    fn test_duration_helpers_reject_overflow() {
        assert_eq!(retention_days(30).unwrap(), Duration::days(30));
        assert!(matches!(retention_days(i64::MAX), Err(LearaError::Validation(_))));
        assert_eq!(ttl_hours(2).unwrap(), Duration::hours(2));
        assert!(matches!(ttl_hours(i64::MIN), Err(LearaError::Validation(_))));
    }

    #[test]
    fn test_storage_config_defaults_from_json() {
        let config: StorageConfig = serde_json::from_str(r#"{"db_path": "/tmp/l.db"}"#).unwrap();
        assert_eq!(config.journal_mode, JournalMode::Wal);
        assert_eq!(config.pool_size, 8);
        assert!(!config.is_in_memory());
        assert!(StorageConfig::in_memory().is_in_memory());
    }
}
