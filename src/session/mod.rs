//! Session context binder
//!
//! A [`SessionScope`] is bound to exactly one session id when it is created,
//! and every read or write it performs is keyed by that id. Callers holding a
//! scope have no way to address another session's facts.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::storage::Store;
use crate::types::{require_non_empty, SessionContext};

/// Handle to the transient facts of one session
#[derive(Clone)]
pub struct SessionScope {
    store: Store,
    session_id: String,
}

impl SessionScope {
    /// Bind to `session_id`, which must be non-empty
    pub fn new(store: Store, session_id: impl Into<String>) -> Result<Self> {
        let session_id = session_id.into();
        require_non_empty("session_id", &session_id)?;
        Ok(Self { store, session_id })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Store `value` under `key`, replacing any previous value
    pub async fn set(&self, key: &str, value: &str) -> Result<SessionContext> {
        self.store
            .upsert_session_context(&self.session_id, key, value)
            .await
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .store
            .get_session_value(&self.session_id, key)
            .await?
            .map(|entry| entry.context_value))
    }

    /// Every entry of this session, oldest first
    pub async fn entries(&self) -> Result<Vec<SessionContext>> {
        self.store.get_session_context(&self.session_id).await
    }

    /// Every entry of this session as a key/value map
    pub async fn all(&self) -> Result<BTreeMap<String, String>> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .map(|entry| (entry.context_key, entry.context_value))
            .collect())
    }

    pub async fn remove(&self, key: &str) -> Result<bool> {
        self.store.delete_session_key(&self.session_id, key).await
    }

    pub async fn clear(&self) -> Result<usize> {
        self.store.clear_session(&self.session_id).await
    }
}

impl Store {
    /// Bind a [`SessionScope`] to `session_id`
    pub fn session(&self, session_id: impl Into<String>) -> Result<SessionScope> {
        SessionScope::new(self.clone(), session_id)
    }
}

/// Render session facts as `key: value` lines for prompt assembly
pub fn render_facts(entries: &[SessionContext]) -> Vec<String> {
    entries
        .iter()
        .map(|entry| format!("{}: {}", entry.context_key, entry.context_value))
        .collect()
}
