use anyhow::Context;
use chat_message::InboundMessage;
use clap::Args;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};

use super::{CliContext, run::parse_level};
use chatflow::apps::App;
use chatflow::channel::sink::ConsoleSink;
use chatflow::config::BotConfig;
use chatflow::logger::{LogConfig, init_tracing};

#[derive(Args, Debug)]
pub struct ChatArgs {
    /// User id the terminal talks as
    #[arg(long, default_value = "console")]
    pub user: String,

    /// Display name sent with every message
    #[arg(long)]
    pub name: Option<String>,

    /// Log level for the terminal session
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

/// `!id` sends a button or list choice, `/quit` leaves.
fn to_message(args: &ChatArgs, line: &str) -> Option<InboundMessage> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let message = match line.strip_prefix('!') {
        Some(id) => InboundMessage::choice(&args.user, id.trim()),
        None => InboundMessage::text(&args.user, line),
    };
    Some(match &args.name {
        Some(name) => message.with_display_name(name),
        None => message,
    })
}

pub async fn execute(args: ChatArgs, context: &CliContext) -> anyhow::Result<()> {
    let config = BotConfig::from_manager(&context.config_manager)
        .await
        .context("reading configuration")?;
    let telemetry = init_tracing(&LogConfig::new(parse_level(&args.log_level), None, None))?;

    let mut app = App::new(config);
    let manager = app.bootstrap(Some(ConsoleSink::new())).await?;

    println!("Chatting as `{}`. Type a message, `!id` to tap a button, `/quit` to leave.", args.user);
    let mut lines = BufReader::new(io::stdin()).lines();
    let mut stdout = io::stdout();
    loop {
        stdout.write_all(b"you> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim() == "/quit" {
            break;
        }
        if let Some(message) = to_message(&args, &line) {
            manager.handle_message(message).await;
        }
    }

    app.shutdown().await;
    telemetry.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> ChatArgs {
        ChatArgs {
            user: "console".into(),
            name: Some("Ada".into()),
            log_level: "warn".into(),
        }
    }

    #[test]
    fn bang_prefix_sends_a_choice() {
        let message = to_message(&args(), " !book_demo ").unwrap();
        assert_eq!(message.choice_id(), Some("book_demo"));
        assert_eq!(message.display_name.as_deref(), Some("Ada"));

        let message = to_message(&args(), "hello").unwrap();
        assert_eq!(message.free_text(), Some("hello"));
        assert!(to_message(&args(), "   ").is_none());
    }
}
