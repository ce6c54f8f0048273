pub mod hf_api;
pub mod ollama;
pub mod rest;

use crate::chat::ConversationMessage;
use crate::error::ChatResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use hf_api::HfApiClient;
pub use ollama::{OllamaClient, ServerStatus};
pub use rest::RestClient;

/// Unified interface for remote chat backends
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send the conversation and return the assistant's reply.
    ///
    /// Implementations never modify `messages`.
    async fn chat(&self, messages: &[ConversationMessage], model: &str) -> ChatResult;

    /// Get backend name for logging/debugging
    fn backend_name(&self) -> &'static str;
}

/// OpenAI-compatible chat completion request body
#[derive(Debug, Serialize)]
pub(crate) struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ConversationMessage],
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompletionChoice {
    pub message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompletionMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatCompletionResponse {
    /// `choices[0].message.content`
    pub(crate) fn into_content(self) -> Option<String> {
        self.choices.into_iter().next()?.message.content
    }
}

/// Human-readable transport failure
pub(crate) fn describe_transport_error(err: &reqwest::Error, timeout: Duration) -> String {
    if err.is_timeout() {
        format!("request timed out after {timeout:?}")
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        err.to_string()
    }
}
