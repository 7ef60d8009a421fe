//! Storage engine for Leara
//!
//! Handles the SQLite pool, schema management and every query against the
//! four record collections (memories, tasks, session context, chat).

pub mod chat_queries;
mod connection;
pub mod expiration;
mod migrations;
pub mod queries;
pub mod session_queries;
pub mod task_queries;

pub use connection::{configure_connection, format_ts, parse_ts, PoolStatus, Store};
pub use expiration::{is_live, memory_state, MemoryState, LIVE_PREDICATE};
pub use migrations::{run_migrations, SCHEMA_VERSION};

#[cfg(test)]
pub(crate) use connection::test_connection;
