//! LLM provider capability interface.
//!
//! The engine never talks to a vendor SDK directly; it depends on
//! [`LlmProvider`] and receives an implementation at construction time.
//! [`HttpProvider`] targets any OpenAI-compatible chat completion endpoint.

use crate::config::LlmConfig;
use async_trait::async_trait;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::pin::Pin;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider returned malformed output: {0}")]
    Malformed(String),

    #[error("missing API key in environment variable {0}")]
    MissingApiKey(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens: 1024,
            temperature: 0.3,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }
}

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// Capability interface over an LLM vendor. Swappable at construction.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Complete with a JSON-schema constraint and return the parsed value.
    async fn complete_structured(
        &self,
        request: CompletionRequest,
        schema: Value,
    ) -> Result<Value, LlmError>;

    /// Complete and stream the answer as incremental text chunks.
    async fn complete_stream(&self, request: CompletionRequest) -> Result<TokenStream, LlmError>;
}

/// Strip ```-fenced wrappers some models insist on adding around JSON.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.split_once('\n') {
        Some((_lang, body)) => body,
        None => rest,
    };
    body.trim().trim_end_matches("```").trim()
}

/// OpenAI-compatible chat completion client (Groq, OpenAI, Ollama, ...).
pub struct HttpProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpProvider {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| LlmError::MissingApiKey(config.api_key_env.clone()))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn chat(&self, request: &CompletionRequest, body_extra: Value) -> Result<String, LlmError> {
        let mut body = json!({
            "model": request.model,
            "messages": request.messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        if let (Value::Object(base), Value::Object(extra)) = (&mut body, body_extra) {
            base.extend(extra);
        }

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Unavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| LlmError::Unavailable(e.to_string()))?;

        let payload: Value = response
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;

        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| LlmError::Malformed("no message content in response".to_string()))
    }
}

#[async_trait]
impl LlmProvider for HttpProvider {
    async fn complete_structured(
        &self,
        request: CompletionRequest,
        schema: Value,
    ) -> Result<Value, LlmError> {
        debug!(model = %request.model, "structured completion");
        let extra = json!({
            "response_format": {
                "type": "json_schema",
                "json_schema": {"name": "output", "schema": schema},
            }
        });
        let raw = self.chat(&request, extra).await?;
        serde_json::from_str(strip_code_fences(&raw)).map_err(|e| LlmError::Malformed(e.to_string()))
    }

    async fn complete_stream(&self, request: CompletionRequest) -> Result<TokenStream, LlmError> {
        debug!(model = %request.model, "streaming completion");
        let content = self.chat(&request, json!({})).await?;

        // Chunk the answer so downstream consumers exercise the same code
        // path as a true token stream.
        let chunks: Vec<Result<String, LlmError>> = content
            .split_inclusive(' ')
            .map(|piece| Ok(piece.to_string()))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_plain_fences() {
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn strips_language_tagged_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn passes_through_unfenced_text() {
        assert_eq!(strip_code_fences("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn chat_message_roles_serialize_lowercase() {
        let v = serde_json::to_value(ChatMessage::system("s")).unwrap();
        assert_eq!(v["role"], "system");
    }
}
