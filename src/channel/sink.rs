use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use chat_message::{OutboundMessage, OutgoingEnvelope};
use reqwest::Client;
use tracing::{debug, info};

use crate::channel::{MessageSinkType, SinkError};

/// Writes every outbound message to the log. The default when no relay is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl LogSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl MessageSinkType for LogSink {
    async fn send(&self, to: &str, message: &OutboundMessage) -> Result<(), SinkError> {
        let json = serde_json::to_string(message).map_err(|e| SinkError::Transport(e.to_string()))?;
        info!("outbound to={} message={}", to, json);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "LogSink"
    }
}

/// Prints messages for a human at a terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }

    pub fn render(message: &OutboundMessage) -> String {
        match message {
            OutboundMessage::Text { body } => body.clone(),
            OutboundMessage::Buttons { body, buttons } => {
                let mut out = body.clone();
                for b in buttons {
                    out.push_str(&format!("\n  [{}] {}", b.id, b.title));
                }
                out
            }
            OutboundMessage::List {
                body,
                button_label,
                sections,
            } => {
                let mut out = format!("{}\n  ({})", body, button_label);
                for section in sections {
                    out.push_str(&format!("\n  {}", section.title));
                    for row in &section.rows {
                        out.push_str(&format!("\n    [{}] {}", row.id, row.title));
                        if let Some(d) = &row.description {
                            out.push_str(&format!(" - {}", d));
                        }
                    }
                }
                out
            }
            OutboundMessage::Media { kind, url, caption } => match caption {
                Some(c) => format!("<{:?} {}> {}", kind, url, c),
                None => format!("<{:?} {}>", kind, url),
            },
            OutboundMessage::Location {
                latitude,
                longitude,
                name,
                address,
            } => format!("{} ({}, {}) {}", name, latitude, longitude, address),
        }
    }
}

#[async_trait]
impl MessageSinkType for ConsoleSink {
    async fn send(&self, _to: &str, message: &OutboundMessage) -> Result<(), SinkError> {
        println!("bot> {}", Self::render(message));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ConsoleSink"
    }
}

/// Keeps everything it is given, in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<(String, OutboundMessage)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<(String, OutboundMessage)> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drains the recording.
    pub fn take(&self) -> Vec<(String, OutboundMessage)> {
        std::mem::take(&mut *self.messages.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn for_user(&self, user: &str) -> Vec<OutboundMessage> {
        self.messages()
            .into_iter()
            .filter(|(to, _)| to == user)
            .map(|(_, m)| m)
            .collect()
    }
}

#[async_trait]
impl MessageSinkType for RecordingSink {
    async fn send(&self, to: &str, message: &OutboundMessage) -> Result<(), SinkError> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((to.to_string(), message.clone()));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "RecordingSink"
    }
}

/// POSTs an [`OutgoingEnvelope`] per message to a relay that speaks the
/// provider's API.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: Client,
    url: String,
    token: Option<String>,
}

impl HttpSink {
    pub fn new(
        url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Arc<Self>, SinkError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        Ok(Arc::new(Self {
            client,
            url: url.into(),
            token,
        }))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl MessageSinkType for HttpSink {
    async fn send(&self, to: &str, message: &OutboundMessage) -> Result<(), SinkError> {
        let envelope = OutgoingEnvelope::new(to, message.clone());
        let mut request = self.client.post(&self.url).json(&envelope);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        debug!("Relayed message to {} via {}", to, self.url);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "HttpSink"
    }
}
