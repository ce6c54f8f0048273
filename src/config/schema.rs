use crate::error::{BielikError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub local: LocalConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct OllamaConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_model")]
    pub model: String,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct RemoteConfig {
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Use the Ollama native chat API as the second step of the chain
    #[serde(default = "default_true")]
    pub ollama_lib: bool,
    /// Use the hosted Hugging Face API as the last step of the chain
    #[serde(default = "default_true")]
    pub hf_api: bool,
    #[serde(default = "default_hf_api_url")]
    pub hf_api_url: String,
    /// Environment variable holding the bearer token (defaults to HF_TOKEN, then HUGGINGFACE_TOKEN)
    pub hf_token_env: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct LocalConfig {
    pub models_dir: Option<PathBuf>,
    #[serde(default = "default_context_length")]
    pub context_length: u32,
    pub threads: Option<u32>,
    #[serde(default)]
    pub gpu_layers: u32,
    #[serde(default = "default_load_timeout_secs")]
    pub load_timeout_secs: u64,
    #[serde(default)]
    pub verbose: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub debug: bool,
}

/// Settings the shell writes back to the config file
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    /// Model picked with `:switch` or an auto-switching `:download`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_model: Option<String>,
    #[serde(default = "default_true")]
    pub auto_switch_after_download: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projects_dir: Option<PathBuf>,
}

// Default value functions
fn default_host() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "SpeakLeash/bielik-7b-instruct-v0.1-gguf".to_string()
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_hf_api_url() -> String {
    "https://router.huggingface.co/v1/chat/completions".to_string()
}
fn default_context_length() -> u32 {
    4096
}
fn default_load_timeout_secs() -> u64 {
    10
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            model: default_model(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            ollama_lib: default_true(),
            hf_api: default_true(),
            hf_api_url: default_hf_api_url(),
            hf_token_env: None,
        }
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            models_dir: None,
            context_length: default_context_length(),
            threads: None,
            gpu_layers: 0,
            load_timeout_secs: default_load_timeout_secs(),
            verbose: false,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_name: None,
            current_model: None,
            auto_switch_after_download: default_true(),
            projects_dir: None,
        }
    }
}

impl SessionConfig {
    pub fn set_user_name(&mut self, name: &str) {
        let name = title_case(name.trim());
        self.user_name = (!name.is_empty()).then_some(name);
    }

    pub fn set_current_model(&mut self, model: &str) {
        self.current_model = Some(model.to_string());
    }

    /// Configured name, else the login name, else "Ty"
    #[must_use]
    pub fn user_display_name(&self) -> String {
        self.user_display_name_with(|key| std::env::var(key).ok())
    }

    pub fn user_display_name_with<F>(&self, lookup: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = &self.user_name {
            return name.clone();
        }
        lookup("USER")
            .or_else(|| lookup("USERNAME"))
            .map(|n| title_case(n.trim()))
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "Ty".to_string())
    }
}

/// Short label for the assistant, derived from the model name
#[must_use]
pub fn assistant_display_name(model: &str) -> String {
    let lowered = model.to_lowercase();
    if lowered.contains("bielik") {
        // Size parts look like "4.5b" or "11b"; version parts carry a "v"
        let size = lowered
            .rsplit('/')
            .next()
            .unwrap_or(&lowered)
            .split('-')
            .filter(|part| !part.contains("bielik"))
            .find(|part| {
                part.chars().any(|c| c.is_ascii_digit()) && part.contains('b') && !part.contains('v')
            });
        return size.map_or_else(|| "bielik".to_string(), |s| format!("bielik-{s}"));
    }

    for (marker, label) in [
        ("llama", "Llama"),
        ("mistral", "Mistral"),
        ("qwen", "Qwen"),
        ("gemma", "Gemma"),
    ] {
        if lowered.contains(marker) {
            return label.to_string();
        }
    }

    let first = model.replace('/', "-");
    let first = first.split('-').next().unwrap_or_default();
    if first.is_empty() {
        return "AI".to_string();
    }
    title_case(first).chars().take(8).collect()
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}

impl RemoteConfig {
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl LocalConfig {
    #[must_use]
    pub const fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs)
    }
}

impl Config {
    /// Load config from the default location, then apply environment overrides
    pub fn load() -> Result<Self> {
        let path = config_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load config from a TOML file; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            BielikError::Config(format!("Failed to parse {}: {e}", path.display()))
        })
    }

    /// Apply environment variable overrides through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("OLLAMA_HOST").filter(|v| !v.is_empty()) {
            self.ollama.host = host;
        }
        if let Some(model) = lookup("BIELIK_MODEL").filter(|v| !v.is_empty()) {
            self.ollama.model = model;
        }
        if let Some(secs) = lookup("REQUEST_TIMEOUT").and_then(|v| v.trim().parse().ok()) {
            self.remote.request_timeout_secs = secs;
        }
        if let Some(secs) = lookup("BIELIK_LOAD_TIMEOUT").and_then(|v| v.trim().parse().ok()) {
            self.local.load_timeout_secs = secs;
        }
        if let Some(debug) = lookup("BIELIK_DEBUG").map(|v| parse_bool(&v)) {
            self.logging.debug = debug;
        }
        if let Some(dir) = lookup("BIELIK_MODELS_DIR").filter(|v| !v.is_empty()) {
            self.local.models_dir = Some(PathBuf::from(dir));
        }
        if let Some(enabled) = lookup("BIELIK_OLLAMA_LIB").map(|v| parse_bool(&v)) {
            self.remote.ollama_lib = enabled;
        }
        if let Some(enabled) = lookup("BIELIK_HF_API").map(|v| parse_bool(&v)) {
            self.remote.hf_api = enabled;
        }
    }

    /// REST chat-completions endpoint derived from the Ollama host
    #[must_use]
    pub fn chat_endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.ollama.host.trim_end_matches('/'))
    }

    /// Directory holding downloaded models and the registry file
    pub fn models_dir(&self) -> Result<PathBuf> {
        match &self.local.models_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_models_dir(),
        }
    }

    /// Directory holding project metadata and artifacts
    pub fn projects_dir(&self) -> Result<PathBuf> {
        match &self.session.projects_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_projects_dir(),
        }
    }

    /// Write the `[session]` table into the config file at `path`.
    ///
    /// Other tables are kept as they are on disk, so environment overrides
    /// applied to this `Config` never leak into the file.
    pub fn persist_session(&self, path: &Path) -> Result<()> {
        let mut table = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            content.parse::<toml::Table>().map_err(|e| {
                BielikError::Config(format!("Failed to parse {}: {e}", path.display()))
            })?
        } else {
            toml::Table::new()
        };

        let session = toml::Value::try_from(&self.session)
            .map_err(|e| BielikError::Config(format!("Failed to serialize session: {e}")))?;
        table.insert("session".to_string(), session);

        let content = toml::to_string_pretty(&table)
            .map_err(|e| BielikError::Config(format!("Failed to serialize config: {e}")))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        tracing::debug!("Saved session settings to {}", path.display());
        Ok(())
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on" | "enabled"
    )
}

/// Get config file path
pub fn config_path() -> Result<PathBuf> {
    let config_dir = if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config)
    } else {
        let home = std::env::var("HOME")
            .map_err(|_| BielikError::Config("HOME env var not set".to_string()))?;
        PathBuf::from(home).join(".config")
    };

    Ok(config_dir.join("bielik").join("config.toml"))
}

fn data_dir() -> Result<PathBuf> {
    if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
        return Ok(PathBuf::from(xdg_data));
    }
    let home = std::env::var("HOME")
        .map_err(|_| BielikError::Config("HOME env var not set".to_string()))?;
    Ok(PathBuf::from(home).join(".local/share"))
}

/// Get default models data directory
pub fn default_models_dir() -> Result<PathBuf> {
    Ok(data_dir()?.join("bielik/models"))
}

/// Get default projects data directory
pub fn default_projects_dir() -> Result<PathBuf> {
    Ok(data_dir()?.join("bielik/projects"))
}
