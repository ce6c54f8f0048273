#![allow(clippy::multiple_crate_versions)]

pub mod backends;
pub mod chat;
pub mod commands;
pub mod config;
pub mod error;
pub mod models;
pub mod projects;
pub mod runner;
pub mod server;

pub use chat::{Conversation, ConversationMessage, Dispatcher, Role};
pub use error::{BielikError, ChatError, ChatResult, ErrorKind, LoadError, Result};
