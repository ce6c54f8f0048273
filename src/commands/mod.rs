//! Chat commands
//!
//! Commands are registered from a static list at startup. They are invoked
//! either directly (`:calc 2+2`) or as context providers (`folder: ~/docs`),
//! whose output is fed to the model as extra context.

pub mod calc;
pub mod folder;

use crate::error::{BielikError, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A command available in the chat shell
pub trait Command: Send + Sync {
    fn name(&self) -> &'static str;

    /// Usage text shown by `:help <name>`
    fn help(&self) -> &'static str;

    /// Output is meant as context for the next model turn
    fn is_context_provider(&self) -> bool {
        false
    }

    fn execute(&self, args: &str, ctx: &CommandContext) -> String;
}

/// Environment a command runs in
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub cwd: PathBuf,
    pub home: Option<PathBuf>,
}

impl CommandContext {
    /// Context for the current process
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            home: dirs::home_dir(),
        }
    }

    /// Expand `~` and make `raw` absolute against `cwd`
    #[must_use]
    pub fn resolve_path(&self, raw: &str) -> PathBuf {
        let expanded = match (raw.strip_prefix('~'), &self.home) {
            (Some(rest), Some(home)) => home.join(rest.trim_start_matches('/')),
            _ => PathBuf::from(raw),
        };
        if expanded.is_absolute() {
            expanded
        } else {
            self.cwd.join(expanded)
        }
    }
}

/// How a command was written in the input line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation<'a> {
    /// `:name args`
    Direct { name: &'a str, args: &'a str },
    /// `name: args`
    Context { name: &'a str, args: &'a str },
}

impl<'a> Invocation<'a> {
    #[must_use]
    pub const fn name(&self) -> &'a str {
        match self {
            Self::Direct { name, .. } | Self::Context { name, .. } => name,
        }
    }

    #[must_use]
    pub const fn args(&self) -> &'a str {
        match self {
            Self::Direct { args, .. } | Self::Context { args, .. } => args,
        }
    }
}

fn is_command_name(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Recognise `:name args` and `name: args`
#[must_use]
pub fn parse_invocation(input: &str) -> Option<Invocation<'_>> {
    let input = input.trim();

    if let Some(rest) = input.strip_prefix(':') {
        let (name, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        return is_command_name(name).then(|| Invocation::Direct {
            name,
            args: args.trim(),
        });
    }

    let (name, args) = input.split_once(':')?;
    is_command_name(name).then(|| Invocation::Context {
        name,
        args: args.trim(),
    })
}

type CommandFactory = fn() -> Box<dyn Command>;

/// Commands compiled into the binary
const BUILTINS: &[CommandFactory] = &[calc::CalcCommand::boxed, folder::FolderCommand::boxed];

/// Explicitly constructed set of commands
#[derive(Default)]
pub struct CommandRegistry {
    commands: BTreeMap<&'static str, Box<dyn Command>>,
}

impl CommandRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in command
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for factory in BUILTINS {
            let command = factory();
            let name = command.name();
            if let Err(e) = registry.register(command) {
                tracing::warn!("Skipping built-in command {name}: {e}");
            }
        }
        registry
    }

    pub fn register(&mut self, command: Box<dyn Command>) -> Result<()> {
        let name = command.name();
        if self.commands.contains_key(name) {
            return Err(BielikError::Other(format!(
                "command '{name}' is already registered"
            )));
        }
        tracing::debug!("Registered command: {name}");
        self.commands.insert(name, command);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn Command> {
        self.commands.get(name).map(|c| &**c)
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.commands.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Command> {
        self.commands.values().map(|c| &**c)
    }

    /// Run `input` if it invokes a registered command
    #[must_use]
    pub fn run(&self, input: &str, ctx: &CommandContext) -> Option<CommandOutput> {
        let invocation = parse_invocation(input)?;
        let command = self.get(invocation.name())?;
        // `name: args` is ordinary prose unless the command feeds the conversation
        if matches!(invocation, Invocation::Context { .. }) && !command.is_context_provider() {
            return None;
        }
        tracing::debug!("Running command {} ({:?})", command.name(), invocation);
        Some(CommandOutput {
            text: command.execute(invocation.args(), ctx),
            is_context: command.is_context_provider(),
        })
    }
}

/// Result of running a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub text: String,
    /// Should be added to the conversation as context
    pub is_context: bool,
}
