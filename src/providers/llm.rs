//! Chat completion provider client

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::CompletionProvider;
use crate::config::ProviderConfig;
use crate::{Error, Result};

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// Generates assistant replies through an OpenAI-compatible chat API
pub struct Completion {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    persona: String,
}

impl Completion {
    /// Create a new completion client. The persona is injected as the
    /// system message of every request.
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(Error::Config("API key required for completion".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.llm_model.clone(),
            persona: config.persona.clone(),
        })
    }
}

#[async_trait]
impl CompletionProvider for Completion {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &self.persona,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "completion request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "completion API error");
            return Err(Error::Completion(format!(
                "completion error {status}: {body}"
            )));
        }

        let result: ChatResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse completion response");
            e
        })?;

        let text = result
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::Completion("completion returned no choices".to_string()))?;

        tracing::debug!(reply_chars = text.len(), "completion received");
        Ok(text)
    }
}
