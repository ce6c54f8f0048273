//! Local GGUF inference
//!
//! A [`LocalRunner`] owns one loaded model and turns chat messages into a
//! completion. The native llama.cpp binding is only compiled with the `local`
//! feature; the rest of the module works against the [`InferenceModel`] and
//! [`ModelLoader`] traits so it runs the same with or without it.

pub mod decode;
pub mod loading;
#[cfg(feature = "local")]
pub mod native;
pub mod progress;

use crate::chat::{ConversationMessage, Role};
use crate::config::schema::LocalConfig;
use crate::error::{ChatError, ChatResult, LoadError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub use loading::{load_model, load_with_timeout, NativeLoader};
pub use progress::GenerationProgress;

/// Stop sequences applied when none are given
pub const DEFAULT_STOP: &[&str] = &["</s>", "<|im_end|>", "<|endoftext|>"];

const CREATIVE_MARKERS: &[&str] = &[
    "napisz",
    "stwórz",
    "stworz",
    "opowiedz",
    "historyj",
    "generuj",
    "zaprojektuj",
];

const FACTUAL_MARKERS: &[&str] = &[
    "ile", "co to", "definiuj", "podaj", "kiedy", "gdzie", "policz", "?",
];

/// Parameters used when loading a model
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerParams {
    pub context_length: u32,
    /// `None` lets the backend pick from the CPU count
    pub threads: Option<u32>,
    pub gpu_layers: u32,
    pub verbose: bool,
    pub load_timeout: Duration,
}

impl Default for RunnerParams {
    fn default() -> Self {
        Self {
            context_length: 4096,
            threads: None,
            gpu_layers: 0,
            verbose: false,
            load_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&LocalConfig> for RunnerParams {
    fn from(config: &LocalConfig) -> Self {
        Self {
            context_length: config.context_length,
            threads: config.threads,
            gpu_layers: config.gpu_layers,
            verbose: config.verbose,
            load_timeout: config.load_timeout(),
        }
    }
}

/// Fully resolved sampling settings for one generation
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingParams {
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub stop: Vec<String>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            max_tokens: 2048,
            temperature: 0.7,
            top_p: 0.9,
            stop: DEFAULT_STOP.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

/// Caller-supplied sampling values; anything left `None` is auto-tuned
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationOverrides {
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub stop: Option<Vec<String>>,
}

impl GenerationOverrides {
    /// Resolve the sampling settings for `prompt`.
    ///
    /// Without an explicit `max_tokens`, short prompts get short budgets:
    /// 64, 128 and 256 tokens below 120, 300 and 800 characters, otherwise
    /// the default capped at 512. Without an explicit temperature, creative
    /// requests get 0.9, factual ones 0.3 and everything else 0.6.
    #[must_use]
    pub fn resolve(&self, prompt: &str) -> SamplingParams {
        let defaults = SamplingParams::default();
        let prompt_len = prompt.chars().count();

        let max_tokens = self.max_tokens.unwrap_or(match prompt_len {
            0..=119 => 64,
            120..=299 => 128,
            300..=799 => 256,
            _ => defaults.max_tokens.min(512),
        });

        let temperature = self.temperature.unwrap_or_else(|| {
            let text = prompt.to_lowercase();
            if CREATIVE_MARKERS.iter().any(|m| text.contains(m)) {
                0.9
            } else if FACTUAL_MARKERS.iter().any(|m| text.contains(m)) {
                0.3
            } else {
                0.6
            }
        });

        SamplingParams {
            max_tokens,
            temperature,
            top_p: self.top_p.unwrap_or(defaults.top_p),
            stop: self.stop.clone().unwrap_or(defaults.stop),
        }
    }
}

/// A loaded model that can complete a prompt
pub trait InferenceModel: Send + Sync {
    /// Generate a completion for `prompt`, ticking `progress` once per token
    fn generate(
        &self,
        prompt: &str,
        params: &SamplingParams,
        progress: &mut GenerationProgress,
    ) -> Result<String>;
}

/// Something that can bring a model file into memory
pub trait ModelLoader: Send + Sync {
    /// Whether this loader can load anything at all
    fn is_available(&self) -> bool {
        true
    }

    fn load(
        &self,
        path: &Path,
        params: &RunnerParams,
    ) -> std::result::Result<Arc<dyn InferenceModel>, LoadError>;
}

/// Flatten chat messages into the plain-text prompt template
#[must_use]
pub fn messages_to_prompt(messages: &[ConversationMessage]) -> String {
    let mut parts: Vec<String> = messages
        .iter()
        .map(|m| {
            let label = match m.role {
                Role::System => "System",
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            format!("{label}: {}", m.content)
        })
        .collect();
    parts.push("Assistant:".to_string());
    parts.join("\n")
}

/// One loaded local model
pub struct LocalRunner {
    path: PathBuf,
    params: RunnerParams,
    model: Arc<dyn InferenceModel>,
}

impl std::fmt::Debug for LocalRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalRunner")
            .field("path", &self.path)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl LocalRunner {
    /// Load `path` with a bounded timeout, retrying on CPU if a GPU load fails
    pub async fn load(
        path: impl Into<PathBuf>,
        params: RunnerParams,
        loader: Arc<dyn ModelLoader>,
    ) -> std::result::Result<Self, LoadError> {
        let path = path.into();
        tracing::info!("Loading model from: {}", path.display());
        let model = load_model(&path, &params, loader).await?;
        tracing::info!("Model loaded successfully");
        Ok(Self {
            path,
            params,
            model,
        })
    }

    /// Wrap an already loaded model
    pub fn from_model(
        path: impl Into<PathBuf>,
        params: RunnerParams,
        model: Arc<dyn InferenceModel>,
    ) -> Self {
        Self {
            path: path.into(),
            params,
            model,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn params(&self) -> &RunnerParams {
        &self.params
    }

    pub async fn chat(&self, messages: &[ConversationMessage]) -> ChatResult {
        self.chat_with(messages, &GenerationOverrides::default())
            .await
    }

    pub async fn chat_with(
        &self,
        messages: &[ConversationMessage],
        overrides: &GenerationOverrides,
    ) -> ChatResult {
        let prompt = messages_to_prompt(messages);
        let sampling = overrides.resolve(&prompt);

        tracing::debug!(
            "Generation parameters: temp={}, top_p={}, max_tokens={}",
            sampling.temperature,
            sampling.top_p,
            sampling.max_tokens
        );

        let model = Arc::clone(&self.model);

        // Native generation is CPU-bound, keep it off the async workers
        let result = tokio::task::spawn_blocking(move || {
            let mut progress = GenerationProgress::start(prompt.chars().count(), sampling.max_tokens);
            let output = model.generate(&prompt, &sampling, &mut progress);
            progress.finish();
            output
        })
        .await
        .map_err(|e| ChatError::local(format!("generation task panicked: {e}")))?;

        match result {
            Ok(text) => {
                let text = text.trim().to_string();
                tracing::debug!("Generated response length: {} characters", text.len());
                Ok(text)
            }
            Err(e) => {
                tracing::error!("Failed to generate response: {e}");
                Err(ChatError::local(e.to_string()))
            }
        }
    }
}
