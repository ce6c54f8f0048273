use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Main error type for Bielik
#[derive(Error, Debug)]
pub enum BielikError {
    #[error("Config error: {0}\n\nTroubleshooting:\n- Check config file: ~/.config/bielik/config.toml\n- Check OLLAMA_HOST / BIELIK_MODEL environment variables\n- Run with RUST_LOG=debug for more details")]
    Config(String),

    #[error("Registry error: {0}\n\nTroubleshooting:\n- Check the models directory is writable (BIELIK_MODELS_DIR)\n- Remove a corrupted model_registry.json; it is rebuilt on the next download")]
    Registry(String),

    #[error("Hub error: {0}\n\nTroubleshooting:\n- Check internet connection\n- Verify the repository exists on huggingface.co\n- Set HF_TOKEN if the repository is gated")]
    Hub(String),

    #[error("Model loading error: {0}")]
    Load(#[from] LoadError),

    #[error("prompt exceeds context: {prompt_tokens} tokens do not fit in a context of {context_length}\n\nTroubleshooting:\n- Clear the conversation with :clear\n- Raise local.context_length in the config file")]
    ContextOverflow {
        prompt_tokens: usize,
        context_length: usize,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Errors raised while bringing a local model into memory
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("model loading timed out after {0:?}; the file might be corrupted or too large")]
    Timeout(Duration),

    #[error("failed to load model: {0}")]
    Failed(String),

    #[error("local inference not installed; rebuild with `--features local`")]
    NotInstalled,
}

/// Which part of the chat pipeline produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Local loading or generation failure
    LocalModel,
    /// Ollama native API call failed
    OllamaLib,
    /// Hosted Hugging Face API failed
    HfApi,
    /// OpenAI-compatible REST endpoint failed
    RestApi,
    /// Nothing else left to try
    Generic,
}

impl ErrorKind {
    /// Bracketed tag printed in front of the message
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::LocalModel => "[LOCAL MODEL ERROR]",
            Self::OllamaLib => "[OLLAMA LIB ERROR]",
            Self::HfApi => "[HF API ERROR]",
            Self::RestApi => "[REST API ERROR]",
            Self::Generic => "[ERROR]",
        }
    }
}

/// Chat failure with a discriminated kind.
///
/// `Display` renders the tagged form, e.g. `[HF API ERROR] HuggingFace token not found`,
/// so the CLI can print it verbatim while library callers match on [`ChatError::kind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ChatError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn local(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LocalModel, message)
    }

    pub fn ollama_lib(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OllamaLib, message)
    }

    pub fn hf_api(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::HfApi, message)
    }

    pub fn rest(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RestApi, message)
    }

    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Generic, message)
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind.tag(), self.message)
    }
}

impl std::error::Error for ChatError {}

impl From<LoadError> for ChatError {
    fn from(err: LoadError) -> Self {
        Self::local(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BielikError>;

/// Outcome of a single chat dispatch
pub type ChatResult = std::result::Result<String, ChatError>;
