use std::path::PathBuf;

use anyhow::Context;
use chat_message::LogLevel;
use clap::Args;
use tokio::signal;
use tracing::{info, warn};

use super::CliContext;
use chatflow::apps::App;
use chatflow::config::BotConfig;
use chatflow::logger::{LogConfig, init_tracing};

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Port for the webhook, overrides PORT
    #[arg(long)]
    pub port: Option<u16>,

    /// Optional log level override (e.g. error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Directory for rolling log files, overrides LOG_DIR
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// OpenTelemetry endpoint (e.g. http://localhost:4317)
    #[arg(long)]
    pub otel_endpoint: Option<String>,

    /// Maximum cross-flow handoffs per message, overrides FLOW_HOP_BUDGET
    #[arg(long)]
    pub hop_budget: Option<usize>,

    /// Flow new users start in, overrides DEFAULT_FLOW
    #[arg(long)]
    pub default_flow: Option<String>,
}

impl RunArgs {
    pub fn default_runtime() -> Self {
        Self {
            log_level: "info".to_string(),
            ..Self::default()
        }
    }

    pub fn apply(&self, config: &mut BotConfig) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(dir) = &self.log_dir {
            config.log_dir = Some(dir.clone());
        }
        if let Some(endpoint) = &self.otel_endpoint {
            config.otel_endpoint = Some(endpoint.clone());
        }
        if let Some(budget) = self.hop_budget {
            config.hop_budget = budget;
        }
        if let Some(flow) = &self.default_flow {
            config.default_flow = flow.clone();
        }
    }
}

pub(crate) fn parse_level(raw: &str) -> LogLevel {
    raw.parse().unwrap_or_else(|e| {
        eprintln!("{}, using info", e);
        LogLevel::Info
    })
}

pub async fn execute(args: RunArgs, context: &CliContext) -> anyhow::Result<()> {
    let mut config = BotConfig::from_manager(&context.config_manager)
        .await
        .context("reading configuration")?;
    args.apply(&mut config);

    let log_dir = config.log_dir.as_ref().map(|dir| context.root.join(dir));
    let telemetry = init_tracing(&LogConfig::new(
        parse_level(&args.log_level),
        log_dir,
        config.otel_endpoint.clone(),
    ))?;

    info!(
        "Chatflow starting up, config={}",
        serde_json::to_string(&config).unwrap_or_default()
    );
    if config.outbound_token.is_none() && config.outbound_url.is_some() {
        warn!("OUTBOUND_URL is set without OUTBOUND_TOKEN");
    }

    let mut app = App::new(config);
    app.bootstrap(None).await?;

    println!("Chatflow running on port {}; press Ctrl‐C to exit", app.config().port);
    app.serve(async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Could not listen for Ctrl‐C: {}", e);
        }
    })
    .await?;

    println!("\nShutting down…");
    app.shutdown().await;
    telemetry.shutdown();
    println!("Goodbye!");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let args = RunArgs {
            port: Some(9000),
            hop_budget: Some(8),
            default_flow: Some("support".into()),
            ..RunArgs::default_runtime()
        };
        let mut config = BotConfig::default();
        args.apply(&mut config);

        assert_eq!(config.port, 9000);
        assert_eq!(config.hop_budget, 8);
        assert_eq!(config.default_flow, "support");
        assert_eq!(config.log_dir, None);
    }

    #[test]
    fn unknown_level_falls_back_to_info() {
        assert_eq!(parse_level("debug"), LogLevel::Debug);
        assert_eq!(parse_level("loud"), LogLevel::Info);
    }
}
