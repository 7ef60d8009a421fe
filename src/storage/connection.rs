//! Pooled database access
//!
//! Every logical operation borrows one connection from a bounded
//! `deadpool-sqlite` pool for its whole duration and hands it back on every
//! exit path. Waiting for a connection is capped by `acquire_timeout_ms`;
//! running out of time surfaces as `StoreUnavailable` instead of blocking.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use deadpool_sqlite::{
    Config, Hook, HookError, InteractError, Pool, PoolConfig, PoolError, Runtime, Timeouts,
};
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, TransactionBehavior};

use super::migrations::run_migrations;
use crate::error::{LearaError, Result};
use crate::types::{JournalMode, StorageConfig};

/// Handle to the shared durable store
///
/// Cheap to clone; clones share one pool. Tests open an isolated instance each
/// with [`Store::open_in_memory`].
#[derive(Clone)]
pub struct Store {
    config: StorageConfig,
    pool: Pool,
}

/// Point-in-time view of the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PoolStatus {
    pub max_size: usize,
    pub size: usize,
    pub available: usize,
    pub waiting: usize,
}

impl Store {
    /// Open or create a database with the given configuration
    pub async fn open(config: StorageConfig) -> Result<Self> {
        if config.pool_size == 0 {
            return Err(LearaError::Config("pool_size must be at least 1".into()));
        }

        if !config.is_in_memory() {
            if let Some(parent) = Path::new(&config.db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        // Every connection to ":memory:" is its own database, so the pool is
        // pinned to one connection that lives as long as the pool.
        let max_size = if config.is_in_memory() {
            1
        } else {
            config.pool_size
        };
        let wait = Duration::from_millis(config.acquire_timeout_ms);
        let mut pool_config = PoolConfig::new(max_size);
        let mut timeouts = Timeouts::new();
        timeouts.wait = Some(wait);
        timeouts.create = Some(wait);
        timeouts.recycle = Some(wait);
        pool_config.timeouts = timeouts;

        let mut manager_config = Config::new(&config.db_path);
        manager_config.pool = Some(pool_config);

        let journal_mode = config.journal_mode;
        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let in_memory = config.is_in_memory();

        let pool = manager_config
            .builder(Runtime::Tokio1)
            .map_err(|e| LearaError::Config(e.to_string()))?
            .post_create(Hook::async_fn(move |conn, _| {
                Box::pin(async move {
                    conn.interact(move |conn| {
                        configure_connection(conn, journal_mode, busy_timeout, in_memory)
                    })
                    .await
                    .map_err(|e| HookError::Message(interact_message(e).into()))?
                    .map_err(HookError::Backend)?;
                    Ok(())
                })
            }))
            .build()
            .map_err(|e| LearaError::Config(e.to_string()))?;

        let store = Self { config, pool };

        store
            .with_connection(|conn| run_migrations(conn))
            .await?;

        tracing::info!(
            db_path = %store.config.db_path,
            pool_size = max_size,
            "Store opened"
        );

        Ok(store)
    }

    /// Open an isolated in-memory store (for tests and ephemeral use)
    pub async fn open_in_memory() -> Result<Self> {
        Self::open(StorageConfig::in_memory()).await
    }

    /// Run `f` on a pooled connection
    ///
    /// The closure runs on the pool's blocking worker; the connection returns
    /// to the pool when it finishes, fails or panics.
    pub async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.pool.get().await.map_err(pool_error)?;
        conn.interact(f)
            .await
            .map_err(|e| LearaError::StoreUnavailable(interact_message(e)))?
    }

    /// Run `f` inside an immediate transaction on a pooled connection
    ///
    /// Commits when `f` returns `Ok`; any error rolls everything back, so no
    /// partial writes are ever visible.
    pub async fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.with_connection(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
        .await
    }

    /// Current pool occupancy
    pub fn pool_status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            max_size: status.max_size,
            size: status.size,
            available: status.available,
            waiting: status.waiting,
        }
    }

    /// Get database path
    pub fn db_path(&self) -> &str {
        &self.config.db_path
    }

    /// Get configuration
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Checkpoint the WAL file (no-op in rollback-journal mode)
    pub async fn checkpoint(&self) -> Result<()> {
        if self.config.journal_mode == JournalMode::Wal && !self.config.is_in_memory() {
            self.with_connection(|conn| {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await?;
        }
        Ok(())
    }

    /// Stop handing out connections; pending and later acquisitions fail
    pub fn close(&self) {
        self.pool.close();
    }
}

/// Apply per-connection pragmas and register scalar functions
pub fn configure_connection(
    conn: &Connection,
    journal_mode: JournalMode,
    busy_timeout: Duration,
    in_memory: bool,
) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;

    if !in_memory {
        match journal_mode {
            JournalMode::Wal => {
                conn.execute_batch(
                    r#"
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA wal_autocheckpoint=1000;
                    "#,
                )?;
            }
            JournalMode::Delete => {
                conn.execute_batch(
                    r#"
                    PRAGMA journal_mode=DELETE;
                    PRAGMA synchronous=FULL;
                    "#,
                )?;
            }
        }
    }

    conn.execute_batch(
        r#"
        PRAGMA foreign_keys=ON;
        PRAGMA temp_store=MEMORY;
        "#,
    )?;

    register_functions(conn)
}

/// `contains_folded(haystack, folded_needle)`: Unicode case-insensitive
/// substring test. The needle must already be lowercased by the caller.
fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "contains_folded",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let haystack: Option<String> = ctx.get(0)?;
            let needle: Option<String> = ctx.get(1)?;
            Ok(match (haystack, needle) {
                (Some(haystack), Some(needle)) => haystack.to_lowercase().contains(&needle),
                _ => false,
            })
        },
    )
}

fn pool_error(err: PoolError) -> LearaError {
    match err {
        PoolError::Timeout(kind) => LearaError::StoreUnavailable(format!(
            "timed out waiting for a database connection ({:?})",
            kind
        )),
        PoolError::Backend(e) => match LearaError::from(e) {
            LearaError::Database(e) => LearaError::StoreUnavailable(e.to_string()),
            other => other,
        },
        other => LearaError::StoreUnavailable(other.to_string()),
    }
}

fn interact_message(err: InteractError) -> String {
    match err {
        InteractError::Panic(_) => "database task panicked".to_string(),
        InteractError::Aborted => "database task was aborted".to_string(),
    }
}

/// Fixed-width RFC 3339 form used for every stored timestamp, so that string
/// order equals time order inside SQL comparisons
pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp
pub fn parse_ts(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Parse an optional stored timestamp
pub fn parse_opt_ts(raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}

/// Open a migrated, configured in-memory connection without a pool
#[cfg(test)]
pub(crate) fn test_connection() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    configure_connection(&conn, JournalMode::Wal, Duration::from_secs(5), true).unwrap();
    run_migrations(&conn).unwrap();
    conn
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_in_memory() {
        let store = Store::open_in_memory().await.unwrap();
        assert_eq!(store.db_path(), ":memory:");
        assert_eq!(store.pool_status().max_size, 1);
    }

    #[tokio::test]
    async fn test_in_memory_state_survives_between_operations() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .with_connection(|conn| {
                conn.execute_batch("CREATE TABLE scratch (x INTEGER); INSERT INTO scratch VALUES (7);")?;
                Ok(())
            })
            .await
            .unwrap();
        let x: i64 = store
            .with_connection(|conn| Ok(conn.query_row("SELECT x FROM scratch", [], |r| r.get(0))?))
            .await
            .unwrap();
        assert_eq!(x, 7);
    }

    #[tokio::test]
    async fn test_failed_transaction_rolls_back() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .with_connection(|conn| {
                conn.execute_batch("CREATE TABLE scratch (x INTEGER)")?;
                Ok(())
            })
            .await
            .unwrap();

        let result: Result<()> = store
            .with_transaction(|conn| {
                conn.execute("INSERT INTO scratch VALUES (1)", [])?;
                Err(LearaError::Validation("boom".into()))
            })
            .await;
        assert!(result.is_err());

        let count: i64 = store
            .with_connection(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM scratch", [], |r| r.get(0))?))
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_pool_exhausted() {
        let mut config = StorageConfig::in_memory();
        config.acquire_timeout_ms = 50;
        let store = Store::open(config).await.unwrap();

        let blocker = store.clone();
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let handle = tokio::spawn(async move {
            blocker
                .with_connection(move |_| {
                    let _ = started_tx.send(());
                    std::thread::sleep(Duration::from_millis(400));
                    Ok(())
                })
                .await
        });
        started_rx.await.unwrap();

        let err = store.with_connection(|_| Ok(())).await.unwrap_err();
        assert!(matches!(err, LearaError::StoreUnavailable(_)), "{err:?}");

        handle.await.unwrap().unwrap();
        store.with_connection(|_| Ok(())).await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_pool_is_unavailable() {
        let store = Store::open_in_memory().await.unwrap();
        store.close();
        let err = store.with_connection(|_| Ok(())).await.unwrap_err();
        assert!(matches!(err, LearaError::StoreUnavailable(_)));
    }

    #[test]
    fn test_timestamp_format_is_fixed_width() {
        let a = DateTime::parse_from_rfc3339("2024-06-28T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let b = a + chrono::Duration::microseconds(5);
        assert_eq!(format_ts(&a), "2024-06-28T10:00:00.000000Z");
        assert_eq!(format_ts(&a).len(), format_ts(&b).len());
        assert!(format_ts(&a) < format_ts(&b));
        assert_eq!(parse_ts(&format_ts(&b)).unwrap(), b);
    }

    #[test]
    fn test_contains_folded_is_unicode_aware() {
        let conn = test_connection();
        let hit: bool = conn
            .query_row("SELECT contains_folded('ÉCOLE Teal', 'école')", [], |r| r.get(0))
            .unwrap();
        assert!(hit);
        let miss: bool = conn
            .query_row("SELECT contains_folded(NULL, 'x')", [], |r| r.get(0))
            .unwrap();
        assert!(!miss);
    }
}
