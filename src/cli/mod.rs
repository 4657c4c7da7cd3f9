use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod chat;
pub mod run;
pub mod schema;

use chat::ChatArgs;
use run::RunArgs;
use schema::SchemaArgs;

use chatflow::config::ConfigManager;

#[derive(Parser, Debug)]
#[command(
    name = "chatflow",
    about = "Menu-driven chatbot runtime",
    version = "0.1.0"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the webhook
    Run(RunArgs),

    /// Talk to the bot from the terminal
    Chat(ChatArgs),

    /// Emit JSON‐Schema
    Schema(SchemaArgs),
}

#[derive(Clone, Debug)]
pub struct CliContext {
    pub root: PathBuf,
    pub config_manager: ConfigManager,
}

impl CliContext {
    pub fn new(root: PathBuf, config_manager: ConfigManager) -> Self {
        Self {
            root,
            config_manager,
        }
    }
}

pub async fn execute(context: &CliContext, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run(args) => run::execute(args, context).await,
        Commands::Chat(args) => chat::execute(args, context).await,
        Commands::Schema(args) => schema::execute(args, context).await,
    }
}

pub fn default_command() -> Commands {
    Commands::Run(RunArgs::default_runtime())
}
