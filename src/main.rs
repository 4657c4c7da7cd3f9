use std::{env, path::PathBuf};

use chatflow::config::{ConfigManager, EnvConfigManager};
use clap::Parser;

mod cli;

use cli::{Cli, CliContext};

/// Working directory of the bot: `.env`, `logs/` and `schemas/` live here.
pub fn resolve_root_dir() -> PathBuf {
    match env::var("CHATFLOW_ROOT") {
        Ok(path) => PathBuf::from(path),
        Err(_) => PathBuf::from("."),
    }
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let root = resolve_root_dir();
    let config_manager = ConfigManager(EnvConfigManager::new(root.join(".env")));
    let context = CliContext::new(root, config_manager);

    let command = cli.command.unwrap_or_else(cli::default_command);
    cli::execute(&context, command).await
}
