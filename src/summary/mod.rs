//! Summary assembly
//!
//! The engine never writes prose itself. It gathers the candidate items
//! (recent live memories, pending tasks, session facts and recent chat
//! messages), renders each as one line of text and hands the ordered list to
//! a [`Summarizer`]. Whatever string that collaborator returns is the summary.
//!
//! # Feature Flags
//!
//! - `ollama`: Enables [`OllamaSummarizer`], backed by a local Ollama server

#[cfg(feature = "ollama")]
mod ollama;

#[cfg(feature = "ollama")]
pub use ollama::{OllamaSummarizer, DEFAULT_OLLAMA_MODEL, DEFAULT_OLLAMA_URL};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{LearaError, Result};
use crate::session::render_facts;
use crate::storage::Store;
use crate::types::{ConversationId, Memory, MemoryListOptions, Message, SummaryConfig, Task};

/// Failure of the external text generator
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("generator unreachable: {0}")]
    Unavailable(String),
    #[error("generator returned status {status}: {body}")]
    Api { status: u16, body: String },
    #[error("invalid generator response: {0}")]
    InvalidResponse(String),
    #[error("generator returned no text")]
    EmptyOutput,
}

impl From<GenerationError> for LearaError {
    fn from(e: GenerationError) -> Self {
        LearaError::Generation(e.to_string())
    }
}

/// External text generator
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Produce a summary of `items`, which arrive in presentation order
    async fn summarize(&self, items: &[String]) -> std::result::Result<String, GenerationError>;

    /// Backend name, for logging
    fn name(&self) -> &str;
}

/// Deterministic digest that lists every item as a bullet
///
/// Needs no external service; the server uses it unless another generator is
/// configured.
#[derive(Debug, Clone, Default)]
pub struct TemplateSummarizer;

#[async_trait]
impl Summarizer for TemplateSummarizer {
    async fn summarize(&self, items: &[String]) -> std::result::Result<String, GenerationError> {
        if items.is_empty() {
            return Err(GenerationError::EmptyOutput);
        }
        let mut out = format!("Summary of {} item(s):\n", items.len());
        for item in items {
            out.push_str("- ");
            out.push_str(item);
            out.push('\n');
        }
        Ok(out)
    }

    fn name(&self) -> &str {
        "template"
    }
}

/// What to summarize beyond the global memories and tasks
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryRequest {
    pub conversation_id: Option<ConversationId>,
    pub session_id: Option<String>,
}

/// Gathers summary inputs from the store and forwards them to a [`Summarizer`]
#[derive(Clone)]
pub struct SummaryEngine {
    store: Store,
    summarizer: Arc<dyn Summarizer>,
    config: SummaryConfig,
}

impl SummaryEngine {
    pub fn new(store: Store, summarizer: Arc<dyn Summarizer>, config: SummaryConfig) -> Self {
        Self {
            store,
            summarizer,
            config,
        }
    }

    pub fn summarizer_name(&self) -> &str {
        self.summarizer.name()
    }

    /// Collect the ordered candidate items for `request`
    ///
    /// Memories (most recently updated first), then pending tasks, then
    /// session facts, then the conversation's recent messages oldest first.
    pub async fn gather(&self, request: &SummaryRequest) -> Result<Vec<String>> {
        let memories = self.store.list_memories(MemoryListOptions {
            limit: Some(self.config.memory_limit),
            ..Default::default()
        });
        let tasks = self.store.pending_tasks(self.config.task_limit);
        let facts = async {
            match request.session_id.as_deref() {
                Some(session_id) => self.store.get_session_context(session_id).await,
                None => Ok(Vec::new()),
            }
        };
        let messages = async {
            match request.conversation_id {
                Some(id) => {
                    // An unknown id is an error, not a summary without messages
                    self.store.get_conversation(id).await?;
                    self.store
                        .recent_messages(id, self.config.message_limit)
                        .await
                }
                None => Ok::<Vec<Message>, LearaError>(Vec::new()),
            }
        };

        let (memories, tasks, facts, messages) =
            futures::try_join!(memories, tasks, facts, messages)?;

        let mut items = Vec::with_capacity(
            memories.items.len() + tasks.len() + facts.len() + messages.len(),
        );
        items.extend(memories.items.iter().map(render_memory));
        items.extend(tasks.iter().map(render_task));
        items.extend(
            render_facts(&facts)
                .into_iter()
                .map(|fact| format!("Session: {}", fact)),
        );
        items.extend(messages.iter().map(render_message));
        Ok(items)
    }

    /// Summarize the current state
    ///
    /// Returns an empty string only when there is nothing to summarize; a
    /// generator failure is an error, never an empty summary.
    pub async fn summarize(&self, request: &SummaryRequest) -> Result<String> {
        let items = self.gather(request).await?;
        if items.is_empty() {
            return Ok(String::new());
        }

        match self.summarizer.summarize(&items).await {
            Ok(summary) if summary.trim().is_empty() => {
                tracing::warn!(summarizer = self.summarizer.name(), "Empty summary generated");
                Err(GenerationError::EmptyOutput.into())
            }
            Ok(summary) => {
                tracing::debug!(
                    summarizer = self.summarizer.name(),
                    items = items.len(),
                    "Summary generated"
                );
                Ok(summary)
            }
            Err(e) => {
                tracing::warn!(
                    summarizer = self.summarizer.name(),
                    error = %e,
                    "Summary generation failed"
                );
                Err(e.into())
            }
        }
    }
}

fn render_memory(memory: &Memory) -> String {
    format!(
        "Memory [{}, priority {}]: {}: {}",
        memory.category, memory.priority, memory.key, memory.value
    )
}

fn render_task(task: &Task) -> String {
    let mut line = format!(
        "Task [{}, priority {}]: {}",
        task.status, task.priority, task.title
    );
    if let Some(due) = task.due_date {
        line.push_str(&format!(" (due {})", due.format("%Y-%m-%d %H:%M UTC")));
    }
    line
}

fn render_message(message: &Message) -> String {
    format!("{}: {}", message.sender, message.content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CreateMemoryInput, CreateTaskInput, Sender, TaskStatus};
    use std::sync::Mutex;

    /// Records what it was given and echoes a fixed reply
    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl Summarizer for Recording {
        async fn summarize(
            &self,
            items: &[String],
        ) -> std::result::Result<String, GenerationError> {
            self.seen.lock().unwrap().push(items.to_vec());
            Ok("ok".to_string())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    struct Failing;

    #[async_trait]
    impl Summarizer for Failing {
        async fn summarize(&self, _: &[String]) -> std::result::Result<String, GenerationError> {
            Err(GenerationError::Unavailable("connection refused".into()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_nothing_to_summarize_skips_generator() {
        let store = Store::open_in_memory().await.unwrap();
        let recording = Arc::new(Recording::default());
        let engine = SummaryEngine::new(store, recording.clone(), SummaryConfig::default());

        let summary = engine.summarize(&SummaryRequest::default()).await.unwrap();
        assert_eq!(summary, "");
        assert!(recording.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_conversation_is_not_found() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .create_memory(CreateMemoryInput::new("fav_color", "teal"))
            .await
            .unwrap();
        let recording = Arc::new(Recording::default());
        let engine = SummaryEngine::new(store, recording.clone(), SummaryConfig::default());

        let request = SummaryRequest {
            conversation_id: Some(uuid::Uuid::new_v4()),
            session_id: None,
        };
        let err = engine.summarize(&request).await.unwrap_err();
        assert!(matches!(err, LearaError::NotFound { entity: "conversation", .. }), "{err:?}");
        assert!(recording.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generator_failure_is_surfaced() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .create_memory(CreateMemoryInput::new("fav_color", "teal"))
            .await
            .unwrap();
        let engine = SummaryEngine::new(store, Arc::new(Failing), SummaryConfig::default());

        let err = engine
            .summarize(&SummaryRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LearaError::Generation(_)));
        assert_eq!(err.status_code(), 502);
    }

    #[tokio::test]
    async fn test_items_are_gathered_in_order() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .create_memory(CreateMemoryInput::new("fav_color", "teal"))
            .await
            .unwrap();
        let done = store
            .create_task(CreateTaskInput::new("Old chore"))
            .await
            .unwrap();
        store
            .update_task_status(done.id, TaskStatus::Completed)
            .await
            .unwrap();
        store
            .create_task(CreateTaskInput::new("Call John").priority(5))
            .await
            .unwrap();
        store
            .upsert_session_context("s1", "mood", "happy")
            .await
            .unwrap();
        store
            .upsert_session_context("s2", "mood", "grumpy")
            .await
            .unwrap();
        let (conversation, _) = store
            .append_message(None, "hi", Sender::User)
            .await
            .unwrap();
        store
            .append_message(Some(conversation.id), "hello!", Sender::Assistant)
            .await
            .unwrap();

        let recording = Arc::new(Recording::default());
        let engine = SummaryEngine::new(store, recording.clone(), SummaryConfig::default());
        let summary = engine
            .summarize(&SummaryRequest {
                conversation_id: Some(conversation.id),
                session_id: Some("s1".into()),
            })
            .await
            .unwrap();
        assert_eq!(summary, "ok");

        let seen = recording.seen.lock().unwrap();
        pretty_assertions::assert_eq!(
            seen[0],
            vec![
                "Memory [general, priority 3]: fav_color: teal".to_string(),
                "Task [pending, priority 5]: Call John".to_string(),
                "Session: mood: happy".to_string(),
                "user: hi".to_string(),
                "assistant: hello!".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_template_summarizer_lists_items() {
        let out = TemplateSummarizer
            .summarize(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(out, "Summary of 2 item(s):\n- a\n- b\n");
    }
}
