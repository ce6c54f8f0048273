//! Interactive chat loop and the printing helpers shared with the `models` subcommands

use anyhow::Result;
use bielik::backends::{hf_api, OllamaClient, ServerStatus};
use bielik::chat::{Conversation, Dispatcher, ExportFormat};
use bielik::commands::{parse_invocation, CommandContext, CommandRegistry, Invocation};
use bielik::config::schema::assistant_display_name;
use bielik::config::Config;
use bielik::models::{format_bytes, CatalogEntry, ModelRegistry};
use bielik::projects::ProjectStore;
use bielik::runner::{ModelLoader, NativeLoader};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

const SHELL_HELP: &str = "\
Commands:
  :help [command]          show this help or a command's usage
  :clear                   start a new conversation
  :models                  list available and downloaded models
  :download <name>         download a model from Hugging Face
  :delete <name>           delete a downloaded model
  :switch <name>           switch the active model (remembered)
  :name <name>             set the name shown in the prompt
  :settings                show the saved session settings
  :project new <name> [description]
  :project list | switch <id|name> | show
                           collect context-command output into projects
  :storage                 show disk usage of downloaded models
  :status                  check the Ollama server and local runtime
  :save <path> [format]    export the conversation (json, text, markdown)
  :exit                    quit";

pub fn spinner(message: impl Into<String>) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.into());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

pub fn print_available(registry: &mut ModelRegistry) {
    println!("Available models:");
    for entry in ModelRegistry::available_models() {
        let mut marks = Vec::new();
        if registry.is_downloaded(entry.name) {
            marks.push("downloaded");
        }
        if entry.recommended {
            marks.push("recommended");
        }
        let marks = if marks.is_empty() {
            String::new()
        } else {
            format!(" [{}]", marks.join(", "))
        };
        println!("  {} ({}, {}){marks}", entry.name, entry.parameters, entry.version);
        println!("      {} (~{} MB)", entry.description, entry.size_mb);
    }
}

pub fn print_downloaded(registry: &mut ModelRegistry) {
    let downloaded = registry.list_downloaded();
    if downloaded.is_empty() {
        println!(
            "No models downloaded. Try: bielik models download {}",
            CatalogEntry::recommended().name
        );
        return;
    }

    println!("Downloaded models:");
    for info in downloaded.values() {
        println!(
            "  {} - {} ({})",
            info.name,
            format_bytes(info.size_bytes),
            info.local_path.display()
        );
    }
}

pub fn print_storage(registry: &mut ModelRegistry) {
    let stats = registry.storage_stats();
    println!("Models directory: {}", stats.models_dir.display());
    println!("Registry file:    {}", stats.registry_file.display());
    println!("Models:           {}", stats.count);
    println!("Total size:       {}", format_bytes(stats.total_bytes));
    for (name, bytes) in &stats.per_model {
        println!("  {name}: {}", format_bytes(*bytes));
    }
}

/// Download with a spinner; returns whether the model ended up on disk
pub async fn download(registry: &mut ModelRegistry, name: &str, force: bool) -> bool {
    let pb = spinner(format!("Downloading {name}..."));
    let result = registry.download(name, force).await;
    pb.finish_and_clear();

    match result {
        Some(info) => {
            println!(
                "Downloaded {} ({}) to {}",
                info.name,
                format_bytes(info.size_bytes),
                info.local_path.display()
            );
            true
        }
        None => {
            match CatalogEntry::suggest(name).filter(|s| *s != name) {
                Some(suggestion) => eprintln!("Download failed for {name}. Did you mean '{suggestion}'?"),
                None => eprintln!("Download failed for {name}. Run with --verbose for details."),
            }
            false
        }
    }
}

pub fn delete(registry: &mut ModelRegistry, name: &str) -> bool {
    if registry.delete(name) {
        println!("Deleted {name}");
        true
    } else {
        eprintln!("Model {name} is not downloaded");
        false
    }
}

pub async fn print_status(config: &Config, registry: &mut ModelRegistry, model: &str) {
    let client = OllamaClient::from_config(config);
    match client.check_status(model).await {
        ServerStatus::Ready => println!("Ollama: {} (model {model} ready)", client.base_url()),
        ServerStatus::ModelMissing { available } => {
            println!("Ollama: {} (model {model} not pulled)", client.base_url());
            if !available.is_empty() {
                println!("  Available: {}", available.join(", "));
            }
        }
        ServerStatus::Unreachable(reason) => {
            println!("Ollama: {} unreachable ({reason})", client.base_url());
        }
    }

    let local = if NativeLoader.is_available() {
        "available"
    } else {
        "not installed (rebuild with --features local)"
    };
    println!("Local inference: {local}");
    println!("Downloaded models: {}", registry.list_downloaded().len());

    let token = hf_api::token_from_env(config.remote.hf_token_env.as_deref());
    println!(
        "Hosted API: {}",
        match (config.remote.hf_api, token.is_some()) {
            (false, _) => "disabled",
            (true, true) => "enabled",
            (true, false) => "enabled, no token (set HF_TOKEN)",
        }
    );
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

enum Flow {
    Continue,
    Exit,
}

/// Interactive chat session
pub struct Shell {
    config: Config,
    /// Where `[session]` changes are written; `None` keeps them in memory
    config_path: Option<PathBuf>,
    dispatcher: Dispatcher,
    commands: CommandRegistry,
    ctx: CommandContext,
    conversation: Conversation,
    projects: Option<ProjectStore>,
    model: String,
    use_local: bool,
}

impl Shell {
    pub fn new(config: Config, dispatcher: Dispatcher, model: String, use_local: bool) -> Self {
        let projects = match config.projects_dir().and_then(|dir| ProjectStore::open(&dir)) {
            Ok(store) => Some(store),
            Err(e) => {
                tracing::warn!("Projects unavailable: {e}");
                None
            }
        };

        Self {
            config_path: bielik::config::schema::config_path().ok(),
            config,
            dispatcher,
            commands: CommandRegistry::with_builtins(),
            ctx: CommandContext::from_env(),
            conversation: Conversation::default(),
            projects,
            model,
            use_local,
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        println!("Bielik - Polish AI assistant");
        println!(
            "Model: {}{}. Type :help for commands, :exit to quit.",
            self.model,
            if self.use_local { " (local)" } else { "" }
        );

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("\n{}: ", self.config.session.user_display_name());
            std::io::stdout().flush()?;

            let Some(line) = lines.next_line().await? else {
                break;
            };

            if matches!(self.handle_line(line.trim()).await, Flow::Exit) {
                break;
            }
        }

        println!("Do widzenia!");
        Ok(())
    }

    async fn handle_line(&mut self, line: &str) -> Flow {
        if line.is_empty() {
            return Flow::Continue;
        }

        if let Some(Invocation::Direct { name, args }) = parse_invocation(line) {
            if let Some(flow) = self.builtin(name, args).await {
                return flow;
            }
        }

        if let Some(output) = self.commands.run(line, &self.ctx) {
            println!("{}", output.text);
            if output.is_context {
                if let Some(invocation) = parse_invocation(line) {
                    self.conversation.push_context(invocation.name(), &output.text);
                    self.record_artifact(invocation.name(), line, &output.text);
                }
                println!("(added to the conversation context)");
            }
            return Flow::Continue;
        }

        if line.starts_with(':') {
            println!("Unknown command: {line}. Type :help for a list.");
            return Flow::Continue;
        }

        self.chat(line).await;
        Flow::Continue
    }

    /// Shell commands that need session state; `None` passes the line on
    async fn builtin(&mut self, name: &str, args: &str) -> Option<Flow> {
        match name {
            "exit" | "quit" | "q" => return Some(Flow::Exit),
            "help" => self.help(args),
            "clear" => {
                self.conversation.reset();
                println!("Conversation cleared.");
            }
            "models" => {
                let registry = self.dispatcher.registry();
                let mut registry = registry.lock().await;
                print_available(&mut registry);
                println!();
                print_downloaded(&mut registry);
            }
            "download" => {
                if args.is_empty() {
                    println!("Usage: :download <name>");
                } else {
                    let registry = self.dispatcher.registry();
                    let downloaded = download(&mut *registry.lock().await, args, false).await;
                    if downloaded && self.config.session.auto_switch_after_download {
                        self.switch(args).await;
                    }
                }
            }
            "delete" => {
                if args.is_empty() {
                    println!("Usage: :delete <name>");
                } else {
                    let registry = self.dispatcher.registry();
                    let deleted = delete(&mut *registry.lock().await, args);
                    // A cached runner would keep the deleted file mapped
                    if deleted {
                        self.dispatcher.clear_runner_cache();
                    }
                }
            }
            "switch" => self.switch(args).await,
            "storage" => {
                let registry = self.dispatcher.registry();
                print_storage(&mut *registry.lock().await);
            }
            "status" => {
                let registry = self.dispatcher.registry();
                print_status(&self.config, &mut *registry.lock().await, &self.model).await;
            }
            "save" => self.save(args),
            "name" => self.set_name(args),
            "settings" => self.print_settings(),
            "project" => self.project(args),
            _ => return None,
        }
        Some(Flow::Continue)
    }

    fn help(&self, args: &str) {
        if let Some(command) = self.commands.get(args) {
            println!("{}", command.help());
            return;
        }

        println!("{SHELL_HELP}");
        println!("\nExtra commands:");
        for command in self.commands.iter() {
            let usage = if command.is_context_provider() {
                format!("{}: <args>", command.name())
            } else {
                format!(":{} <args>", command.name())
            };
            println!("  {usage}");
        }
    }

    async fn switch(&mut self, name: &str) {
        if name.is_empty() {
            println!("Current model: {}", self.model);
            return;
        }

        if CatalogEntry::find(name).is_some() {
            let registry = self.dispatcher.registry();
            if !registry.lock().await.is_downloaded(name) {
                println!("Model {name} is not downloaded. Use :download {name}");
                return;
            }
            self.use_local = true;
        } else {
            self.use_local = Dispatcher::is_local_model(name);
        }

        self.model = name.to_string();
        self.config.session.set_current_model(name);
        self.persist_session();
        println!(
            "Switched to {}{}",
            self.model,
            if self.use_local { " (local)" } else { "" }
        );
    }

    fn persist_session(&self) {
        let Some(path) = &self.config_path else {
            return;
        };
        if let Err(e) = self.config.persist_session(path) {
            eprintln!("Failed to save settings: {e}");
        }
    }

    fn set_name(&mut self, name: &str) {
        if name.trim().is_empty() {
            println!("Usage: :name <name>");
            return;
        }
        self.config.session.set_user_name(name);
        self.persist_session();
        println!("Hello, {}!", self.config.session.user_display_name());
    }

    fn print_settings(&self) {
        let session = &self.config.session;
        println!("User name:       {}", session.user_display_name());
        println!("Assistant name:  {}", assistant_display_name(&self.model));
        println!(
            "Current model:   {}",
            session.current_model.as_deref().unwrap_or("(not set)")
        );
        println!(
            "Auto-switch:     {}",
            if session.auto_switch_after_download { "on" } else { "off" }
        );
        if let Some(path) = &self.config_path {
            println!("Config file:     {}", path.display());
        }
    }

    fn project(&mut self, args: &str) {
        let Some(projects) = self.projects.as_mut() else {
            eprintln!("Projects are unavailable; check the data directory permissions");
            return;
        };

        let (action, rest) = args.trim().split_once(char::is_whitespace).unwrap_or((args.trim(), ""));
        let rest = rest.trim();
        match action {
            "new" => {
                let (name, description) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                match projects.create_project(name, description, &[]) {
                    Ok(id) => println!("Created project {name} ({}) and made it current", short_id(&id)),
                    Err(e) => eprintln!("{e}"),
                }
            }
            "list" | "" => {
                let listings = projects.list_projects();
                if listings.is_empty() {
                    println!("No projects yet. Try: :project new <name>");
                }
                for p in listings {
                    println!(
                        "{} {} {} ({} artifacts)",
                        if p.is_current { "*" } else { " " },
                        short_id(&p.id),
                        p.name,
                        p.artifacts_count
                    );
                }
            }
            "switch" => {
                if projects.switch_to_project(rest) {
                    if let Some(current) = projects.current() {
                        println!("Switched to project {}", current.name);
                    }
                } else {
                    eprintln!("Project {rest} not found");
                }
            }
            "show" => match projects.summary((!rest.is_empty()).then_some(rest)) {
                Some(summary) => {
                    println!("Project: {} ({})", summary.project.name, summary.project.id);
                    if !summary.project.description.is_empty() {
                        println!("  {}", summary.project.description);
                    }
                    println!(
                        "Artifacts: {} ({}), types: {}",
                        summary.artifacts.len(),
                        format_bytes(summary.total_size),
                        summary.artifact_types.into_iter().collect::<Vec<_>>().join(", ")
                    );
                    for artifact in &summary.artifacts {
                        println!("  {} [{}] {}", artifact.name, artifact.kind, artifact.command);
                    }
                }
                None => eprintln!("No such project. Use :project list"),
            },
            other => println!("Unknown project action: {other}. Use new, list, switch or show."),
        }
    }

    /// Keep context output in the current project, if one is active
    fn record_artifact(&mut self, kind: &str, command: &str, content: &str) {
        let Some(projects) = self.projects.as_mut() else {
            return;
        };
        if projects.current().is_none() {
            return;
        }
        match projects.add_artifact(kind, command, content, None) {
            Ok(_) => println!("(saved to the current project)"),
            Err(e) => eprintln!("Failed to save artifact: {e}"),
        }
    }

    fn save(&self, args: &str) {
        let mut parts = args.split_whitespace();
        let Some(path) = parts.next() else {
            println!("Usage: :save <path> [json|text|markdown]");
            return;
        };

        let format = match parts.next().map(str::parse::<ExportFormat>) {
            None => ExportFormat::Markdown,
            Some(Ok(format)) => format,
            Some(Err(e)) => {
                eprintln!("{e}");
                return;
            }
        };

        let path: PathBuf = self.ctx.resolve_path(path);
        match self.conversation.save(&path, format) {
            Ok(()) => println!("Saved to {}", path.display()),
            Err(e) => eprintln!("Failed to save conversation: {e}"),
        }
    }

    async fn chat(&mut self, line: &str) {
        let messages = self.conversation.with_pending(line);
        let pb = spinner("Bielik myśli...");
        let result = self
            .dispatcher
            .send_chat(&messages, &self.model, self.use_local)
            .await;
        pb.finish_and_clear();

        match result {
            Ok(reply) => {
                println!("\n{}: {reply}", assistant_display_name(&self.model));
                self.conversation.push_turn(line, reply);
            }
            Err(e) => {
                tracing::debug!("Chat failed ({:?})", e.kind);
                eprintln!("{e}");
            }
        }
    }
}
