use std::path::PathBuf;

use anyhow::{Context, Result};
use chat_message::LogLevel;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};
use opentelemetry_otlp::{MetricExporter, WithExportConfig};
use opentelemetry_sdk::{Resource, metrics::SdkMeterProvider};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

use crate::flow::manager::TurnOutcome;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct LogConfig {
    pub log_level: LogLevel,
    /// Directory for the rolling text log and the JSON turn log. Stdout only when unset.
    pub log_dir: Option<PathBuf>,
    /// OTLP collector for metrics; metrics stay in-process when unset.
    pub otel_endpoint: Option<String>,
}

impl LogConfig {
    pub fn new(log_level: LogLevel, log_dir: Option<PathBuf>, otel_endpoint: Option<String>) -> Self {
        Self {
            log_level,
            log_dir,
            otel_endpoint,
        }
    }
}

/// Keeps the log writers and the meter provider alive for the process lifetime.
pub struct Telemetry {
    meter_provider: Option<SdkMeterProvider>,
    _guards: Vec<WorkerGuard>,
}

impl Telemetry {
    pub fn shutdown(self) {
        if let Some(provider) = self.meter_provider {
            if let Err(e) = provider.shutdown() {
                error!("Metric provider shutdown failed: {}", e);
            }
        }
    }
}

fn filter_for(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_directive()))
}

/// Installs the global subscriber: stdout, plus a daily text log and a JSON
/// turn log (events with `target: "turn"`) when a log directory is given.
pub fn init_tracing(config: &LogConfig) -> Result<Telemetry> {
    let mut guards = Vec::new();

    let stdout_layer = fmt::layer()
        .with_thread_names(true)
        .with_filter(filter_for(config.log_level));

    let (text_layer, turn_layer) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;

            let (text_writer, text_guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "chatflow.log"));
            let (turn_writer, turn_guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "turns.json"));
            guards.push(text_guard);
            guards.push(turn_guard);

            let text = fmt::layer()
                .with_writer(text_writer)
                .with_ansi(false)
                .with_filter(filter_for(config.log_level));
            let turns = fmt::layer()
                .json()
                .with_writer(turn_writer)
                .with_target(true)
                .with_filter(EnvFilter::new("turn=info"));
            (Some(text), Some(turns))
        }
        None => (None, None),
    };

    Registry::default()
        .with(stdout_layer)
        .with(text_layer)
        .with(turn_layer)
        .try_init()
        .context("installing tracing subscriber")?;

    let meter_provider = match &config.otel_endpoint {
        Some(endpoint) => Some(init_metrics(endpoint)?),
        None => None,
    };

    Ok(Telemetry {
        meter_provider,
        _guards: guards,
    })
}

fn init_metrics(endpoint: &str) -> Result<SdkMeterProvider> {
    let exporter = MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .context("building OTLP metric exporter")?;

    let provider = SdkMeterProvider::builder()
        .with_periodic_exporter(exporter)
        .with_resource(Resource::builder().with_service_name("chatflow").build())
        .build();
    global::set_meter_provider(provider.clone());
    info!("Exporting metrics to {}", endpoint);
    Ok(provider)
}

/// Counters and the latency histogram recorded once per turn. Backed by the
/// global meter, a no-op until a provider is installed.
#[derive(Debug, Clone)]
pub struct TurnMetrics {
    turns: Counter<u64>,
    handoffs: Counter<u64>,
    fallbacks: Counter<u64>,
    commands: Counter<u64>,
    undelivered: Counter<u64>,
    latency_ms: Histogram<f64>,
}

impl Default for TurnMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnMetrics {
    pub fn new() -> Self {
        let meter = global::meter("chatflow");
        Self {
            turns: meter
                .u64_counter("chat_turns")
                .with_description("Inbound messages processed")
                .build(),
            handoffs: meter.u64_counter("chat_handoffs").build(),
            fallbacks: meter
                .u64_counter("chat_fallbacks")
                .with_description("Turns redirected to the default flow")
                .build(),
            commands: meter.u64_counter("chat_commands").build(),
            undelivered: meter
                .u64_counter("chat_undelivered_messages")
                .with_description("Outbound messages the sink failed to deliver")
                .build(),
            latency_ms: meter
                .f64_histogram("chat_turn_latency_ms")
                .with_description("Latency per turn in ms")
                .with_unit("ms")
                .build(),
        }
    }

    pub fn record(&self, outcome: &TurnOutcome, elapsed_ms: f64) {
        let flow = [KeyValue::new("flow", outcome.flow.clone())];
        self.turns.add(1, &flow);
        if outcome.hops > 0 {
            self.handoffs.add(outcome.hops as u64, &flow);
        }
        if outcome.fell_back {
            self.fallbacks.add(1, &flow);
        }
        if outcome.messages_failed > 0 {
            self.undelivered.add(outcome.messages_failed as u64, &flow);
        }
        if let Some(command) = outcome.command {
            let kind = serde_json::to_value(command)
                .ok()
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_default();
            self.commands.add(1, &[KeyValue::new("command", kind)]);
        }
        self.latency_ms.record(elapsed_ms, &flow);
    }
}
