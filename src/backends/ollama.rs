//! Ollama native API client

use super::{describe_transport_error, ChatBackend};
use crate::chat::ConversationMessage;
use crate::config::Config;
use crate::error::{ChatError, ChatResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ConversationMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

/// Response from Ollama tags API (list models)
#[derive(Debug, Deserialize)]
struct OllamaTagsResponse {
    #[serde(default)]
    models: Vec<OllamaModel>,
}

#[derive(Debug, Deserialize)]
struct OllamaModel {
    name: String,
}

/// Result of probing the Ollama server for a model
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerStatus {
    /// Server answered and has the model
    Ready,
    /// Server answered but the model is not pulled
    ModelMissing { available: Vec<String> },
    /// Server could not be reached
    Unreachable(String),
}

/// Client for Ollama's `/api/chat` and `/api/tags`
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.ollama.host, config.remote.request_timeout())
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Names of the models the server has pulled
    pub async fn list_models(&self) -> Result<Vec<String>, ChatError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ChatError::ollama_lib(describe_transport_error(&e, self.timeout)))?;

        if !response.status().is_success() {
            return Err(ChatError::ollama_lib(format!(
                "Ollama server at {} answered {}",
                self.base_url,
                response.status()
            )));
        }

        let tags: OllamaTagsResponse = response
            .json()
            .await
            .map_err(|e| ChatError::ollama_lib(format!("Failed to parse model list: {e}")))?;

        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Check whether the server is up and `model` is available
    pub async fn check_status(&self, model: &str) -> ServerStatus {
        match self.list_models().await {
            Ok(available) => {
                if model_matches(&available, model) {
                    ServerStatus::Ready
                } else {
                    ServerStatus::ModelMissing { available }
                }
            }
            Err(e) => ServerStatus::Unreachable(e.message),
        }
    }
}

/// Exact name, or the same base name with any tag (`bielik` matches `bielik:latest`)
fn model_matches(available: &[String], model: &str) -> bool {
    let base = model.split(':').next().unwrap_or(model);
    available
        .iter()
        .any(|name| name == model || name.starts_with(&format!("{base}:")))
}

#[async_trait]
impl ChatBackend for OllamaClient {
    async fn chat(&self, messages: &[ConversationMessage], model: &str) -> ChatResult {
        let body = OllamaChatRequest {
            model,
            messages,
            stream: false,
        };

        let url = format!("{}/api/chat", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ChatError::ollama_lib(describe_transport_error(&e, self.timeout)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ChatError::ollama_lib(format!("{status}: {text}")));
        }

        let parsed: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| ChatError::ollama_lib(format!("Failed to parse response: {e}")))?;

        if let Some(error) = parsed.error {
            return Err(ChatError::ollama_lib(error));
        }

        parsed
            .message
            .map(|m| m.content)
            .ok_or_else(|| ChatError::ollama_lib("Missing 'message' in response"))
    }

    fn backend_name(&self) -> &'static str {
        "ollama"
    }
}
