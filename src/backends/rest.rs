use super::{describe_transport_error, ChatBackend, ChatCompletionRequest, ChatCompletionResponse};
use crate::chat::ConversationMessage;
use crate::config::Config;
use crate::error::{ChatError, ChatResult};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

/// OpenAI-compatible REST endpoint on the Ollama host
#[derive(Debug, Clone)]
pub struct RestClient {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl RestClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            timeout,
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.chat_endpoint(), config.remote.request_timeout())
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ChatBackend for RestClient {
    async fn chat(&self, messages: &[ConversationMessage], model: &str) -> ChatResult {
        let body = ChatCompletionRequest {
            model,
            messages,
            stream: false,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ChatError::rest(describe_transport_error(&e, self.timeout)))?;

        let status = response.status();

        match status {
            StatusCode::OK => {
                let parsed: ChatCompletionResponse = response
                    .json()
                    .await
                    .map_err(|e| ChatError::rest(format!("Failed to parse response: {e}")))?;

                parsed.into_content().ok_or_else(|| {
                    ChatError::rest("Missing 'choices[0].message.content' in response")
                })
            }
            StatusCode::NOT_FOUND => Err(ChatError::rest(format!(
                "Model '{model}' not found at {}",
                self.endpoint
            ))),
            _ => {
                let error_body = response.text().await.unwrap_or_default();
                Err(ChatError::rest(format!("API error ({status}): {error_body}")))
            }
        }
    }

    fn backend_name(&self) -> &'static str {
        "rest"
    }
}
