//! Conversation state and the backend dispatcher

pub mod dispatch;

use crate::error::{BielikError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub use dispatch::Dispatcher;

/// Default system prompt for new conversations
pub const SYSTEM_PROMPT: &str =
    "You are Bielik, a helpful Polish AI assistant. Respond in Polish unless asked otherwise.";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single chat message, serialized the way OpenAI-compatible APIs expect
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
}

impl ConversationMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Text,
    Markdown,
}

impl FromStr for ExportFormat {
    type Err = BielikError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" | "txt" => Ok(Self::Text),
            "markdown" | "md" => Ok(Self::Markdown),
            other => Err(BielikError::Other(format!(
                "Unsupported export format: {other}. Use json, text or markdown"
            ))),
        }
    }
}

#[derive(Serialize)]
struct JsonExport<'a> {
    conversation: &'a [ConversationMessage],
    message_count: usize,
    export_format: &'static str,
}

/// Ordered chat history starting with a system prompt.
///
/// Turns are only appended after a successful reply, so a failed request
/// leaves the history exactly as it was.
#[derive(Debug, Clone)]
pub struct Conversation {
    system_prompt: String,
    messages: Vec<ConversationMessage>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new(SYSTEM_PROMPT)
    }
}

impl Conversation {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        let system_prompt = system_prompt.into();
        Self {
            messages: vec![ConversationMessage::system(system_prompt.clone())],
            system_prompt,
        }
    }

    #[must_use]
    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    /// History plus a pending user message, for sending without committing
    #[must_use]
    pub fn with_pending(&self, user: &str) -> Vec<ConversationMessage> {
        let mut pending = self.messages.clone();
        pending.push(ConversationMessage::user(user));
        pending
    }

    pub fn push_turn(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        self.messages.push(ConversationMessage::user(user));
        self.messages.push(ConversationMessage::assistant(assistant));
    }

    /// Add command output as a user message the model sees on the next turn
    pub fn push_context(&mut self, source: &str, content: &str) {
        self.messages
            .push(ConversationMessage::user(format!("Context from {source}:\n{content}")));
    }

    /// Drop everything but the system prompt
    pub fn reset(&mut self) {
        self.messages.truncate(0);
        self.messages
            .push(ConversationMessage::system(self.system_prompt.clone()));
    }

    pub fn export(&self, format: ExportFormat) -> Result<String> {
        match format {
            ExportFormat::Json => {
                let doc = JsonExport {
                    conversation: &self.messages,
                    message_count: self.messages.len(),
                    export_format: "json",
                };
                Ok(serde_json::to_string_pretty(&doc)?)
            }
            ExportFormat::Text => {
                let mut lines = Vec::new();
                for msg in self.messages.iter().filter(|m| m.role != Role::System) {
                    lines.push(format!("{}: {}", msg.role.as_str().to_uppercase(), msg.content));
                    lines.push(String::new());
                }
                Ok(lines.join("\n"))
            }
            ExportFormat::Markdown => {
                let mut lines = vec!["# Bielik Conversation Export".to_string(), String::new()];
                for msg in &self.messages {
                    match msg.role {
                        Role::System => lines.push(format!("**System Prompt:** {}", msg.content)),
                        Role::User => {
                            lines.push("## User".to_string());
                            lines.push(msg.content.clone());
                        }
                        Role::Assistant => {
                            lines.push("## Assistant".to_string());
                            lines.push(msg.content.clone());
                        }
                    }
                    lines.push(String::new());
                }
                Ok(lines.join("\n"))
            }
        }
    }

    /// Write the export to `path`, creating parent directories
    pub fn save(&self, path: &Path, format: ExportFormat) -> Result<()> {
        let content = self.export(format)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        tracing::info!("Conversation saved to: {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> Conversation {
        let mut conv = Conversation::new("Be brief.");
        conv.push_turn("Cześć", "Dzień dobry!");
        conv
    }

    #[test]
    fn test_new_starts_with_system_prompt() {
        let conv = Conversation::default();
        assert_eq!(conv.messages().len(), 1);
        assert_eq!(conv.messages()[0].role, Role::System);
        assert_eq!(conv.messages()[0].content, SYSTEM_PROMPT);
    }

    #[test]
    fn test_with_pending_does_not_commit() {
        let conv = sample();
        let pending = conv.with_pending("Jak się masz?");
        assert_eq!(pending.len(), 4);
        assert_eq!(conv.messages().len(), 3);
    }

    #[test]
    fn test_reset_keeps_system_prompt() {
        let mut conv = sample();
        conv.reset();
        assert_eq!(conv.messages(), &[ConversationMessage::system("Be brief.")]);
    }

    #[test]
    fn test_push_context() {
        let mut conv = sample();
        conv.push_context("folder", "Files: 2");
        let last = conv.messages().last().unwrap();
        assert_eq!(last.role, Role::User);
        assert_eq!(last.content, "Context from folder:\nFiles: 2");
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&ConversationMessage::assistant("ok")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"ok"}"#);
    }

    #[test]
    fn test_export_json() {
        let out = sample().export(ExportFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["message_count"], 3);
        assert_eq!(value["export_format"], "json");
        assert_eq!(value["conversation"][1]["role"], "user");
    }

    #[test]
    fn test_export_text_skips_system() {
        let out = sample().export(ExportFormat::Text).unwrap();
        assert!(!out.contains("Be brief."));
        assert!(out.starts_with("USER: Cześć\n\nASSISTANT: Dzień dobry!"));
    }

    #[test]
    fn test_export_markdown() {
        let out = sample().export(ExportFormat::Markdown).unwrap();
        assert!(out.starts_with("# Bielik Conversation Export\n\n**System Prompt:** Be brief."));
        assert!(out.contains("## User\nCześć"));
        assert!(out.contains("## Assistant\nDzień dobry!"));
    }

    #[test]
    fn test_parse_format() {
        assert_eq!("MD".parse::<ExportFormat>().unwrap(), ExportFormat::Markdown);
        assert_eq!("json".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert!("pdf".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_save_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("exports/chat.md");
        sample().save(&path, ExportFormat::Markdown).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("## Assistant"));
    }
}
