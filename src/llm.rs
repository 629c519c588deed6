//! Chat model collaborator.
//!
//! [`ChatModel`] is the seam the answer synthesizer calls through.
//! [`OllamaChat`] talks to Ollama's non-streaming `/api/chat` endpoint;
//! tests substitute their own implementations.

use std::time::Duration;

use serde::Deserialize;

use crate::config::LlmConfig;
use crate::error::{EngineError, Result};
use crate::models::PromptMessage;

const SERVICE: &str = "chat";

pub trait ChatModel: Send {
    fn model_name(&self) -> &str;
    /// Sends `messages` and returns the assistant's reply text.
    fn complete(&self, messages: &[PromptMessage]) -> Result<String>;
}

pub struct OllamaChat {
    model: String,
    url: String,
    client: reqwest::blocking::Client,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

impl OllamaChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::transport(SERVICE, e))?;

        Ok(Self {
            model: config.model.clone(),
            url: config.url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

impl ChatModel for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    #[tracing::instrument(level = "debug", skip_all, fields(model = %self.model))]
    fn complete(&self, messages: &[PromptMessage]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
        });

        let response = self
            .client
            .post(format!("{}/api/chat", self.url))
            .json(&body)
            .send()
            .map_err(|e| {
                EngineError::transport(
                    SERVICE,
                    format!("Ollama connection error (is Ollama running at {}?): {}", self.url, e),
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().unwrap_or_default();
            return Err(EngineError::transport(
                SERVICE,
                format!("Ollama API error {}: {}", status, body_text),
            ));
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| EngineError::transport(SERVICE, format!("malformed chat response: {}", e)))?;
        Ok(parsed.message.content)
    }
}
