//! Leara - assistant memory engine
//!
//! Durable memories, tasks, per-session context and chat history for an AI
//! assistant backend, stored in SQLite behind a bounded connection pool.

pub mod api;
pub mod error;
pub mod search;
pub mod session;
pub mod storage;
pub mod summary;
pub mod types;

pub use error::{LearaError, Result};
pub use session::SessionScope;
pub use storage::Store;
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
