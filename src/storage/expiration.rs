//! Expiration policy
//!
//! A memory is in exactly one of three states. Visibility on every "current"
//! read path is decided here, once in Rust and once as the equivalent SQL
//! fragment; the two must stay in agreement.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Memory;

/// SQL predicate selecting live rows of `memories`. Takes one positional
/// parameter: the current instant formatted with `format_ts`.
pub const LIVE_PREDICATE: &str = "is_active = 1 AND (expires_at IS NULL OR expires_at > ?)";

/// Visibility state of a memory at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryState {
    Live,
    /// Active, but its expiry has passed
    Expired,
    /// Soft-deleted; takes precedence over expiry
    Deactivated,
}

/// Classify a memory at `now`
pub fn memory_state(memory: &Memory, now: DateTime<Utc>) -> MemoryState {
    state_of(memory.is_active, memory.expires_at, now)
}

/// Classify from the raw fields
pub fn state_of(
    is_active: bool,
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> MemoryState {
    if !is_active {
        return MemoryState::Deactivated;
    }
    match expires_at {
        Some(at) if at <= now => MemoryState::Expired,
        _ => MemoryState::Live,
    }
}

/// `true` when the memory should appear in listings and search results
pub fn is_live(memory: &Memory, now: DateTime<Utc>) -> bool {
    memory_state(memory, now) == MemoryState::Live
}
