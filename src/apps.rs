// src/apps.rs
use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::{Context, Error, Result, anyhow};
use tracing::{info, warn};

use crate::{
    channel::{
        MessageSink,
        sink::{HttpSink, LogSink},
        webhook,
    },
    config::BotConfig,
    flow::{
        manager::FlowManager,
        session::{InMemorySessionStore, SessionStore},
    },
    scripts::{ScriptSettings, default_registry},
};

pub struct App {
    config: BotConfig,
    flow_manager: Option<Arc<FlowManager>>,
}

impl App {
    pub fn new(config: BotConfig) -> Self {
        Self {
            config,
            flow_manager: None,
        }
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    /// Wires store, sink, scripts and the flow manager together.
    /// `sink` overrides the sink the configuration would pick.
    pub async fn bootstrap(&mut self, sink: Option<MessageSink>) -> Result<Arc<FlowManager>, Error> {
        let store = self.session_store()?;
        let sink = match sink {
            Some(sink) => sink,
            None => self.configured_sink()?,
        };

        let scripts = ScriptSettings {
            media_base_url: self.config.media_base_url.clone(),
        };
        let registry = default_registry(&self.config.default_flow, &scripts)?;

        info!(
            "Bootstrapping: store={} sink={} flows={:?} default={}",
            store.name(),
            sink.name(),
            registry.names(),
            registry.default_flow()
        );
        let manager = FlowManager::new(registry, store, sink, self.config.manager_settings());
        self.flow_manager = Some(manager.clone());
        Ok(manager)
    }

    pub fn flow_manager(&self) -> Option<Arc<FlowManager>> {
        self.flow_manager.clone()
    }

    /// Serves the webhook on the configured port until `shutdown` resolves.
    pub async fn serve<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let manager = self
            .flow_manager()
            .ok_or_else(|| anyhow!("serve called before bootstrap"))?;
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        webhook::serve(addr, manager, shutdown).await
    }

    pub async fn shutdown(&self) {
        if let Some(manager) = &self.flow_manager {
            let active = manager.sessions().await.len();
            info!("Shutting down with {} active sessions", active);
        }
    }

    fn session_store(&self) -> Result<SessionStore> {
        let ttl = self.config.session_ttl();
        match &self.config.redis_url {
            #[cfg(feature = "redis-store")]
            Some(url) => {
                let store: SessionStore = crate::flow::redis_session::RedisSessionStore::new(url, ttl)
                    .context("opening redis session store")?;
                Ok(store)
            }
            #[cfg(not(feature = "redis-store"))]
            Some(_) => {
                warn!("REDIS_URL is set but redis-store support is not compiled in, keeping sessions in memory");
                let store: SessionStore = InMemorySessionStore::new(ttl);
                Ok(store)
            }
            None => {
                let store: SessionStore = InMemorySessionStore::new(ttl);
                Ok(store)
            }
        }
    }

    fn configured_sink(&self) -> Result<MessageSink> {
        match &self.config.outbound_url {
            Some(url) => {
                let sink: MessageSink = HttpSink::new(
                    url.clone(),
                    self.config.outbound_token.clone(),
                    self.config.outbound_timeout(),
                )
                .context("creating outbound HTTP sink")?;
                Ok(sink)
            }
            None => {
                warn!("OUTBOUND_URL not set, outbound messages are only logged");
                let sink: MessageSink = LogSink::new();
                Ok(sink)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::sink::RecordingSink;
    use chat_message::InboundMessage;

    #[tokio::test]
    async fn bootstrap_wires_the_default_scripts() {
        let mut app = App::new(BotConfig::default());
        let sink = RecordingSink::new();
        let manager = app.bootstrap(Some(sink.clone())).await.unwrap();

        assert_eq!(manager.registry().default_flow(), "main");
        assert_eq!(manager.store().name(), "InMemorySessionStore");

        let outcome = manager.handle_message(InboundMessage::text("u1", "hello")).await;
        assert_eq!(outcome.step, "main_menu");
        assert_eq!(sink.for_user("u1").len(), 1);
        assert!(app.flow_manager().is_some());
    }

    #[tokio::test]
    async fn bootstrap_fails_on_unknown_default_flow() {
        let config = BotConfig {
            default_flow: "travel".into(),
            ..BotConfig::default()
        };
        assert!(App::new(config).bootstrap(None).await.is_err());
    }

    #[tokio::test]
    async fn serve_requires_bootstrap() {
        let app = App::new(BotConfig::default());
        assert!(app.serve(async {}).await.is_err());
    }
}
