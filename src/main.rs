#![allow(clippy::multiple_crate_versions)]

mod shell;

use anyhow::{Context, Result};
use bielik::chat::{Conversation, Dispatcher};
use bielik::config::Config;
use bielik::models::{HfHub, ModelRegistry};
use bielik::server::ServerState;
use clap::{Args, Parser, Subcommand};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bielik", version)]
#[command(about = "Polish AI assistant on Ollama, hosted APIs and local GGUF models", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Ollama host (overrides OLLAMA_HOST and the config file)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args, Clone, Default)]
struct ChatArgs {
    /// Model to talk to (defaults to the last :switch, then the configured model)
    #[arg(short, long)]
    model: Option<String>,

    /// Only use the local GGUF runner, no remote fallback
    #[arg(long)]
    use_local: bool,

    /// Downloaded model or .gguf path to run locally (implies --use-local)
    #[arg(long, value_name = "NAME")]
    local_model: Option<String>,
}

impl ChatArgs {
    fn resolve(&self, config: &Config) -> (String, bool) {
        match &self.local_model {
            Some(local) => (local.clone(), true),
            None => (
                self.model
                    .clone()
                    .or_else(|| config.session.current_model.clone())
                    .unwrap_or_else(|| config.ollama.model.clone()),
                self.use_local,
            ),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat (default)
    Chat(ChatArgs),
    /// Ask a single question and print the answer
    Ask {
        /// Question text
        #[arg(required = true)]
        prompt: Vec<String>,
        #[command(flatten)]
        args: ChatArgs,
    },
    /// Manage local models
    Models {
        #[command(subcommand)]
        action: ModelsAction,
    },
    /// Serve the chat over HTTP and WebSocket
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:8000")]
        bind: String,
        #[command(flatten)]
        args: ChatArgs,
    },
    /// Check the Ollama server and local runtime
    Status {
        /// Model to check for on the server
        #[arg(short, long)]
        model: Option<String>,
    },
}

#[derive(Subcommand)]
enum ModelsAction {
    /// List models that can be downloaded
    Available,
    /// List downloaded models
    List,
    /// Download a model from Hugging Face
    Download {
        name: String,
        /// Download again even if already present
        #[arg(long)]
        force: bool,
    },
    /// Delete a downloaded model
    Delete { name: String },
    /// Show disk usage of downloaded models
    Storage,
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn open_registry(config: &Config) -> Result<Arc<Mutex<ModelRegistry>>> {
    let models_dir = config.models_dir()?;
    let hub = HfHub::new().with_token(bielik::backends::hf_api::token_from_env(
        config.remote.hf_token_env.as_deref(),
    ));
    let registry = ModelRegistry::open(&models_dir, Arc::new(hub))
        .with_context(|| format!("Failed to open model registry in {}", models_dir.display()))?;
    Ok(Arc::new(Mutex::new(registry)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(host) = cli.host {
        config.ollama.host = host;
    }
    init_logging(cli.verbose || config.logging.debug);
    tracing::debug!("Configuration: {config:?}");

    let registry = open_registry(&config)?;

    match cli.command.unwrap_or_else(|| Commands::Chat(ChatArgs::default())) {
        Commands::Chat(args) => {
            let (model, use_local) = args.resolve(&config);
            let dispatcher = Dispatcher::from_config(&config, registry);
            shell::Shell::new(config, dispatcher, model, use_local)
                .run()
                .await
        }
        Commands::Ask { prompt, args } => {
            let (model, use_local) = args.resolve(&config);
            let dispatcher = Dispatcher::from_config(&config, registry);
            let messages = Conversation::default().with_pending(&prompt.join(" "));

            match dispatcher.send_chat(&messages, &model, use_local).await {
                Ok(reply) => println!("{reply}"),
                Err(e) => eprintln!("{e}"),
            }
            Ok(())
        }
        Commands::Serve { bind, args } => {
            let (model, use_local) = args.resolve(&config);
            let state = ServerState {
                dispatcher: Arc::new(Dispatcher::from_config(&config, registry)),
                model,
                use_local,
            };
            bielik::server::serve(&bind, Arc::new(state))
                .await
                .with_context(|| format!("Server on {bind} failed"))
        }
        Commands::Models { action } => {
            let mut registry = registry.lock().await;
            match action {
                ModelsAction::Available => shell::print_available(&mut registry),
                ModelsAction::List => shell::print_downloaded(&mut registry),
                ModelsAction::Download { name, force } => {
                    shell::download(&mut registry, &name, force).await;
                }
                ModelsAction::Delete { name } => {
                    shell::delete(&mut registry, &name);
                }
                ModelsAction::Storage => shell::print_storage(&mut registry),
            }
            Ok(())
        }
        Commands::Status { model } => {
            let model = model
                .or_else(|| config.session.current_model.clone())
                .unwrap_or_else(|| config.ollama.model.clone());
            shell::print_status(&config, &mut *registry.lock().await, &model).await;
            Ok(())
        }
    }
}
