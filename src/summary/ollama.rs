//! Ollama-backed summary generation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{GenerationError, Summarizer};

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "openhermes:latest";

const SYSTEM_PROMPT: &str = "You are the memory of a personal assistant. Summarize the \
    following items in a few short sentences. Keep names, dates and priorities. Do not \
    invent facts.";

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    system: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Calls `POST {base_url}/api/generate` on an Ollama server
pub struct OllamaSummarizer {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaSummarizer {
    pub fn new(base_url: Option<String>, model: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: model.unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string()),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Numbered item list handed to the model
pub(crate) fn build_prompt(items: &[String]) -> String {
    let mut prompt = String::from("Items:\n");
    for (i, item) in items.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, item));
    }
    prompt
}

#[async_trait]
impl Summarizer for OllamaSummarizer {
    async fn summarize(&self, items: &[String]) -> Result<String, GenerationError> {
        let url = format!("{}/api/generate", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&GenerateRequest {
                model: &self.model,
                prompt: build_prompt(items),
                system: SYSTEM_PROMPT,
                stream: false,
            })
            .send()
            .await
            .map_err(|e| GenerationError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Api { status, body });
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;

        let text = body.response.trim();
        if text.is_empty() {
            return Err(GenerationError::EmptyOutput);
        }

        tracing::debug!(model = %self.model, "Ollama summary received");
        Ok(text.to_string())
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_numbers_items() {
        let prompt = build_prompt(&["a".to_string(), "b".to_string()]);
        assert_eq!(prompt, "Items:\n1. a\n2. b\n");
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let summarizer = OllamaSummarizer::new(Some("http://host:11434/".into()), None);
        assert_eq!(summarizer.base_url, "http://host:11434");
        assert_eq!(summarizer.model(), DEFAULT_OLLAMA_MODEL);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_generation_error() {
        // Port 9 (discard) is never an Ollama server
        let summarizer = OllamaSummarizer::new(Some("http://127.0.0.1:9".into()), None);
        let err = summarizer.summarize(&["x".to_string()]).await.unwrap_err();
        assert!(matches!(err, GenerationError::Unavailable(_)));
    }
}
