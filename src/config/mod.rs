//! Configuration module for bielik
//!
//! Loads config from `$XDG_CONFIG_HOME/bielik/config.toml` or `~/.config/bielik/config.toml`.
//! Falls back to embedded defaults if the file doesn't exist, then applies
//! environment overrides (`OLLAMA_HOST`, `BIELIK_MODEL`, `REQUEST_TIMEOUT`,
//! `BIELIK_LOAD_TIMEOUT`, `BIELIK_DEBUG`, `BIELIK_MODELS_DIR`, ...).
//!
//! # Example
//!
//! ```no_run
//! use bielik::config::Config;
//!
//! let config = Config::load().expect("Failed to load config");
//! println!("Ollama host: {}", config.ollama.host);
//! println!("Load timeout: {}s", config.local.load_timeout_secs);
//! ```

pub mod schema;

pub use schema::Config;
