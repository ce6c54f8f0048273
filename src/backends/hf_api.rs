use super::{describe_transport_error, ChatBackend, ChatCompletionRequest, ChatCompletionResponse};
use crate::chat::ConversationMessage;
use crate::config::schema::RemoteConfig;
use crate::error::{ChatError, ChatResult};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

/// Token variables tried in order when no explicit one is configured
pub const TOKEN_ENV_VARS: &[&str] = &["HF_TOKEN", "HUGGINGFACE_TOKEN"];

/// Hosted identifier every Bielik variant is routed to
pub const HOSTED_BIELIK_MODEL: &str = "speakleash/Bielik-11B-v2.3-Instruct";

/// Hosted Hugging Face inference (OpenAI-compatible router)
pub struct HfApiClient {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    timeout: Duration,
}

impl std::fmt::Debug for HfApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HfApiClient")
            .field("client", &"Client { ... }")
            .field("endpoint", &self.endpoint)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HfApiClient {
    pub fn new(endpoint: impl Into<String>, token: Option<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            token,
            timeout,
        }
    }

    /// Build from config, reading the token from the environment
    #[must_use]
    pub fn from_config(config: &RemoteConfig) -> Self {
        let token = token_from_env(config.hf_token_env.as_deref());
        Self::new(config.hf_api_url.clone(), token, config.request_timeout())
    }

    #[must_use]
    pub const fn has_token(&self) -> bool {
        self.token.is_some()
    }
}

/// First non-empty token among `custom` (if set) or [`TOKEN_ENV_VARS`]
#[must_use]
pub fn token_from_env(custom: Option<&str>) -> Option<String> {
    let candidates: Vec<&str> = custom.map_or_else(|| TOKEN_ENV_VARS.to_vec(), |c| vec![c]);
    candidates
        .into_iter()
        .filter_map(|key| std::env::var(key).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

/// Map a local model name onto an identifier the hosted API serves
pub fn hosted_model_for(model: &str) -> Result<String, ChatError> {
    let lowered = model.to_lowercase();
    if lowered.contains("bielik") {
        return Ok(HOSTED_BIELIK_MODEL.to_string());
    }

    let mut parts = model.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(org), Some(name), None) if !org.is_empty() && !name.is_empty() => {
            Ok(model.to_string())
        }
        _ => Err(ChatError::hf_api(format!(
            "Model '{model}' is not supported by the hosted API"
        ))),
    }
}

#[async_trait]
impl ChatBackend for HfApiClient {
    async fn chat(&self, messages: &[ConversationMessage], model: &str) -> ChatResult {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| ChatError::hf_api("HuggingFace token not found"))?;

        let hosted_model = hosted_model_for(model)?;
        tracing::debug!("Hosted API model: {hosted_model}");

        let body = ChatCompletionRequest {
            model: &hosted_model,
            messages,
            stream: false,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ChatError::hf_api(describe_transport_error(&e, self.timeout)))?;

        let status = response.status();

        match status {
            StatusCode::OK => {
                let parsed: ChatCompletionResponse = response
                    .json()
                    .await
                    .map_err(|e| ChatError::hf_api(format!("Failed to parse response: {e}")))?;

                parsed.into_content().ok_or_else(|| {
                    ChatError::hf_api("Missing 'choices[0].message.content' in response")
                })
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ChatError::hf_api(
                "HuggingFace token rejected; check HF_TOKEN",
            )),
            StatusCode::TOO_MANY_REQUESTS => Err(ChatError::hf_api("Rate limit exceeded")),
            _ => {
                let error_body = response.text().await.unwrap_or_default();
                Err(ChatError::hf_api(format!("API error ({status}): {error_body}")))
            }
        }
    }

    fn backend_name(&self) -> &'static str {
        "hf_api"
    }
}
