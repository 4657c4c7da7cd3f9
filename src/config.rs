use async_trait::async_trait;
use chrono::TimeDelta;
use dashmap::DashMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{env, path::PathBuf, str::FromStr, time::Duration};
use thiserror::Error;
use tracing::{debug, info};

use crate::flow::manager::{
    DEFAULT_APOLOGY_TEXT, DEFAULT_HELP_TEXT, DEFAULT_HOP_BUDGET, ManagerSettings,
};

#[async_trait]
pub trait ConfigManagerType: Send + Sync {
    async fn keys(&self) -> Vec<String>;
    async fn get(&self, key: &str) -> Option<String>;
    fn clone_box(&self) -> Box<dyn ConfigManagerType>;
    fn debug_box(&self) -> String;
}

pub struct ConfigManager(pub Box<dyn ConfigManagerType>);

impl ConfigManager {
    pub fn into_inner(self) -> Box<dyn ConfigManagerType> {
        self.0
    }

    /// Trimmed value; blank values count as unset.
    pub async fn value(&self, key: &str) -> Option<String> {
        self.0
            .get(key)
            .await
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

impl Clone for ConfigManager {
    fn clone(&self) -> Self {
        ConfigManager(self.0.clone_box())
    }
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.debug_box())
    }
}

/// Process environment, optionally seeded from a `.env` file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnvConfigManager {
    env_file: PathBuf,
}

impl EnvConfigManager {
    pub fn new(env_file: PathBuf) -> Box<Self> {
        if env_file.exists() {
            dotenvy::from_path(&env_file).ok();
            info!("Loaded .env from {}", env_file.display());
        } else {
            debug!("No .env at {}, using process environment", env_file.display())
        }

        Box::new(Self { env_file })
    }
}

#[async_trait]
impl ConfigManagerType for EnvConfigManager {
    async fn keys(&self) -> Vec<String> {
        env::vars().map(|(k, _)| k).collect()
    }

    async fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }

    fn clone_box(&self) -> Box<dyn ConfigManagerType> {
        Box::new(self.clone())
    }

    fn debug_box(&self) -> String {
        format!("EnvConfigManager({})", self.env_file.display())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct MapConfigManager {
    #[schemars(with = "std::collections::HashMap<String, String>")]
    map: DashMap<String, String>,
}

impl MapConfigManager {
    pub fn new() -> Box<Self> {
        Box::new(Self::default())
    }

    pub fn with(self: Box<Self>, key: &str, value: &str) -> Box<Self> {
        self.map.insert(key.to_string(), value.to_string());
        self
    }

    pub fn set(&self, key: &str, value: &str) {
        self.map.insert(key.to_string(), value.to_string());
    }
}

#[async_trait]
impl ConfigManagerType for MapConfigManager {
    async fn keys(&self) -> Vec<String> {
        self.map.iter().map(|entry| entry.key().clone()).collect()
    }

    async fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).map(|v| v.clone())
    }

    fn clone_box(&self) -> Box<dyn ConfigManagerType> {
        Box::new(self.clone())
    }

    fn debug_box(&self) -> String {
        format!("MapConfigManager({} entries)", self.map.len())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}={value:?} is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Typed runtime settings, read from a [`ConfigManager`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BotConfig {
    pub port: u16,
    pub session_ttl_hours: i64,
    pub hop_budget: usize,
    pub default_flow: String,
    pub reset_data_on_flow_change: bool,
    pub outbound_url: Option<String>,
    #[serde(skip_serializing)]
    pub outbound_token: Option<String>,
    pub outbound_timeout_secs: u64,
    pub redis_url: Option<String>,
    pub help_text: String,
    /// `None` disables the apology message.
    pub apology_text: Option<String>,
    pub media_base_url: Option<String>,
    pub otel_endpoint: Option<String>,
    pub log_dir: Option<PathBuf>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            port: 7000,
            session_ttl_hours: 24,
            hop_budget: DEFAULT_HOP_BUDGET,
            default_flow: "main".to_string(),
            reset_data_on_flow_change: true,
            outbound_url: None,
            outbound_token: None,
            outbound_timeout_secs: 10,
            redis_url: None,
            help_text: DEFAULT_HELP_TEXT.to_string(),
            apology_text: Some(DEFAULT_APOLOGY_TEXT.to_string()),
            media_base_url: None,
            otel_endpoint: None,
            log_dir: None,
        }
    }
}

fn parse<T>(key: &'static str, raw: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| ConfigError::Invalid {
        key,
        value: raw.clone(),
        reason: e.to_string(),
    })
}

fn parse_bool(key: &'static str, raw: String) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: "expected true or false".to_string(),
        }),
    }
}

impl BotConfig {
    pub async fn from_manager(config: &ConfigManager) -> Result<Self, ConfigError> {
        let mut bot = BotConfig::default();

        if let Some(v) = config.value("PORT").await {
            bot.port = parse("PORT", v)?;
        }
        if let Some(v) = config.value("SESSION_TTL_HOURS").await {
            bot.session_ttl_hours = parse("SESSION_TTL_HOURS", v.clone())?;
            let reason = if bot.session_ttl_hours <= 0 {
                Some("must be positive")
            } else if TimeDelta::try_hours(bot.session_ttl_hours).is_none() {
                Some("is out of range")
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(ConfigError::Invalid {
                    key: "SESSION_TTL_HOURS",
                    value: v,
                    reason: reason.to_string(),
                });
            }
        }
        if let Some(v) = config.value("FLOW_HOP_BUDGET").await {
            bot.hop_budget = parse("FLOW_HOP_BUDGET", v)?;
        }
        if let Some(v) = config.value("DEFAULT_FLOW").await {
            bot.default_flow = v;
        }
        if let Some(v) = config.value("RESET_DATA_ON_FLOW_CHANGE").await {
            bot.reset_data_on_flow_change = parse_bool("RESET_DATA_ON_FLOW_CHANGE", v)?;
        }
        if let Some(v) = config.value("OUTBOUND_TIMEOUT_SECS").await {
            bot.outbound_timeout_secs = parse("OUTBOUND_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = config.value("HELP_TEXT").await {
            bot.help_text = v;
        }
        // present but blank switches the apology off
        if let Some(raw) = config.0.get("APOLOGY_TEXT").await {
            let text = raw.trim();
            bot.apology_text = (!text.is_empty()).then(|| text.to_string());
        }
        bot.outbound_url = config.value("OUTBOUND_URL").await;
        bot.outbound_token = config.value("OUTBOUND_TOKEN").await;
        bot.redis_url = config.value("REDIS_URL").await;
        bot.media_base_url = config.value("MEDIA_BASE_URL").await;
        bot.otel_endpoint = config.value("OTEL_EXPORTER_OTLP_ENDPOINT").await;
        bot.log_dir = config.value("LOG_DIR").await.map(PathBuf::from);

        Ok(bot)
    }

    /// Validated by `from_manager`; hand-built values past chrono's range saturate.
    pub fn session_ttl(&self) -> TimeDelta {
        TimeDelta::try_hours(self.session_ttl_hours).unwrap_or(TimeDelta::MAX)
    }

    pub fn outbound_timeout(&self) -> Duration {
        Duration::from_secs(self.outbound_timeout_secs)
    }

    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            hop_budget: self.hop_budget,
            help_text: self.help_text.clone(),
            apology_text: self.apology_text.clone(),
            reset_data_on_flow_change: self.reset_data_on_flow_change,
            ..ManagerSettings::default()
        }
    }
}
