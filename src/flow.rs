// src/flow.rs

pub mod commands;
pub mod dispatcher;
pub mod manager;
#[cfg(feature = "redis-store")]
pub mod redis_session;
pub mod registry;
pub mod session;
pub mod transition;

use std::fmt::Debug;

use async_trait::async_trait;
use chat_message::{Button, OutboundMessage};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    channel::Outbox,
    flow::session::Session,
    state::{SessionData, StateValue},
};

/// Conventional entry step of a freshly activated flow.
pub const ENTRY_STEP: &str = "start";

/// What a flow handler asks the framework to do after a step ran.
///
/// `next_flow` takes precedence over a bare `next_step`; an empty result means
/// "stay on the current step".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StepResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_flow: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<SessionData>,
}

impl StepResult {
    /// Stay on the current step, typically after a re-prompt.
    pub fn stay() -> Self {
        Self::default()
    }

    /// Move to another step of the same flow.
    pub fn goto(step: impl Into<String>) -> Self {
        Self {
            next_step: Some(step.into()),
            ..Self::default()
        }
    }

    /// Hand off to another flow at its entry step.
    pub fn handoff(flow: impl Into<String>) -> Self {
        Self {
            next_flow: Some(flow.into()),
            ..Self::default()
        }
    }

    /// Hand off to another flow at a named step.
    pub fn handoff_to(flow: impl Into<String>, step: impl Into<String>) -> Self {
        Self {
            next_flow: Some(flow.into()),
            next_step: Some(step.into()),
            data: None,
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<StateValue>) -> Self {
        self.data
            .get_or_insert_with(SessionData::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_data(mut self, data: SessionData) -> Self {
        self.data.get_or_insert_with(SessionData::new).extend(data);
        self
    }

    pub fn is_handoff(&self) -> bool {
        self.next_flow.is_some()
    }
}

#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize, JsonSchema)]
pub enum FlowError {
    #[error("flow `{0}` is not registered")]
    UnknownFlow(String),
    #[error("flow `{flow}` has no step `{step}`")]
    UnknownStep { flow: String, step: String },
    #[error("session data `{0}` is missing")]
    MissingData(String),
    #[error("step failed: {0}")]
    Step(String),
    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// The two input channels of an inbound message. A handler may use either or
/// both depending on how the message was classified upstream.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepInput<'a> {
    pub text: Option<&'a str>,
    pub choice: Option<&'a str>,
}

impl<'a> StepInput<'a> {
    pub fn new(text: Option<&'a str>, choice: Option<&'a str>) -> Self {
        Self { text, choice }
    }

    /// No input at all, used when a flow is entered by a handoff.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Everything a handler sees while processing one step.
pub struct StepContext<'a> {
    pub user: &'a str,
    pub step: &'a str,
    pub input: StepInput<'a>,
    pub session: &'a Session,
    outbox: &'a Outbox,
}

impl<'a> StepContext<'a> {
    pub fn new(session: &'a Session, input: StepInput<'a>, outbox: &'a Outbox) -> Self {
        Self {
            user: &session.user,
            step: &session.current_step,
            input,
            session,
            outbox,
        }
    }

    /// Trimmed free text, empty when the message carried none.
    pub fn text(&self) -> &str {
        self.input.text.map(str::trim).unwrap_or_default()
    }

    pub fn choice(&self) -> Option<&str> {
        self.input.choice
    }

    pub fn data(&self, key: &str) -> Option<&StateValue> {
        self.session.data.get(key)
    }

    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data(key).and_then(StateValue::as_str)
    }

    /// Name to greet the user with.
    pub fn display_name(&self) -> &str {
        self.session
            .display_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or("Friend")
    }

    pub async fn send(&self, message: OutboundMessage) {
        self.outbox.send(message).await;
    }

    pub async fn send_text(&self, body: impl Into<String>) {
        self.send(OutboundMessage::text(body)).await;
    }

    pub async fn send_buttons(&self, body: impl Into<String>, buttons: Vec<Button>) {
        self.send(OutboundMessage::buttons(body, buttons)).await;
    }
}

/// A named conversation script. Handlers are stateless per invocation: all
/// conversation state lives in the session.
#[async_trait]
pub trait FlowHandler: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Step a freshly activated flow starts at.
    fn entry_step(&self) -> &str {
        ENTRY_STEP
    }

    async fn process_step(&self, ctx: &StepContext<'_>) -> Result<StepResult, FlowError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handoff_takes_precedence_flag() {
        let r = StepResult::handoff_to("booking", "start");
        assert!(r.is_handoff());
        assert!(!StepResult::goto("form").is_handoff());
        assert_eq!(StepResult::stay(), StepResult::default());
    }

    #[test]
    fn with_accumulates_data() {
        let r = StepResult::goto("form")
            .with("field", "email")
            .with("attempts", 2i64);
        let data = r.data.unwrap();
        assert_eq!(data["field"], StateValue::from("email"));
        assert_eq!(data["attempts"], StateValue::Number(2.0));
    }

    #[test]
    fn step_result_deserializes_from_partial_json() {
        let r: StepResult =
            serde_json::from_value(serde_json::json!({"next_step": "main_menu"})).unwrap();
        assert_eq!(r, StepResult::goto("main_menu"));
    }
}
