/*
 POST /webhook ──▶ webhook.rs ──▶ FlowManager::handle_message
                                        │
                                        ▼
                                 FlowHandler steps
                                        │ ctx.send(..)
                                        ▼
                  Outbox (one per turn, bound to the user)
                                        │
                                        ▼
              MessageSink: Log | Console | Recording | Http
*/
pub mod sink;
pub mod webhook;

use std::{
    fmt::Debug,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use chat_message::OutboundMessage;
use thiserror::Error;
use tracing::error;

pub type MessageSink = Arc<dyn MessageSinkType>;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("outbound transport failed: {0}")]
    Transport(String),
    #[error("outbound endpoint answered {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Delivers outbound messages to the end user.
#[async_trait]
pub trait MessageSinkType: Send + Sync + Debug {
    async fn send(&self, to: &str, message: &OutboundMessage) -> Result<(), SinkError>;

    fn name(&self) -> &'static str;
}

/// Per-turn handle handlers send through. Failures are logged and counted,
/// never surfaced to the flow.
#[derive(Debug)]
pub struct Outbox {
    sink: MessageSink,
    to: String,
    sent: AtomicUsize,
    failed: AtomicUsize,
}

impl Outbox {
    pub fn new(sink: MessageSink, to: impl Into<String>) -> Self {
        Self {
            sink,
            to: to.into(),
            sent: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    pub async fn send(&self, message: OutboundMessage) {
        match self.sink.send(&self.to, &message).await {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                error!("{} could not deliver to {}: {}", self.sink.name(), self.to, e);
            }
        }
    }

    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }
}
