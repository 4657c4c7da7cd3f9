use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A message received from a chat channel, already classified upstream into
/// free text and/or a discrete choice (button or list selection).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct InboundMessage {
    #[serde(default = "new_message_id")]
    pub id: String,                       // Channel-provided or generated
    pub user: String,                     // Opaque user key, e.g. phone number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,     // Profile name if the channel has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,             // Free text, or the title of a tapped button
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choice: Option<String>,           // Button / list row identifier
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl InboundMessage {
    pub fn text(user: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            user: user.into(),
            display_name: None,
            text: Some(text.into()),
            choice: None,
            timestamp: Utc::now(),
        }
    }

    pub fn choice(user: impl Into<String>, choice: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            user: user.into(),
            display_name: None,
            text: None,
            choice: Some(choice.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Free text with surrounding whitespace removed; `None` when blank.
    pub fn free_text(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    pub fn choice_id(&self) -> Option<&str> {
        self.choice.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Button {
    pub id: String,
    pub title: String,
}

impl Button {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self { id: id.into(), title: title.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ListSection {
    pub title: String,
    pub rows: Vec<ListRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ListRow {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ListRow {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self { id: id.into(), title: title.into(), description: None }
    }

    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

/// Provider-neutral outbound message. Channel adapters translate these into
/// their own payloads.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Text {
        body: String,
    },
    Buttons {
        body: String,
        buttons: Vec<Button>,
    },
    List {
        body: String,
        button_label: String,
        sections: Vec<ListSection>,
    },
    Media {
        kind: MediaKind,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    Location {
        latitude: f64,
        longitude: f64,
        name: String,
        address: String,
    },
}

impl OutboundMessage {
    pub fn text(body: impl Into<String>) -> Self {
        OutboundMessage::Text { body: body.into() }
    }

    pub fn buttons(body: impl Into<String>, buttons: Vec<Button>) -> Self {
        OutboundMessage::Buttons { body: body.into(), buttons }
    }

    pub fn list(
        body: impl Into<String>,
        button_label: impl Into<String>,
        sections: Vec<ListSection>,
    ) -> Self {
        OutboundMessage::List {
            body: body.into(),
            button_label: button_label.into(),
            sections,
        }
    }

    pub fn media(kind: MediaKind, url: impl Into<String>, caption: Option<String>) -> Self {
        OutboundMessage::Media { kind, url: url.into(), caption }
    }

    /// The main human-readable text of the message, if it has one.
    pub fn body(&self) -> Option<&str> {
        match self {
            OutboundMessage::Text { body }
            | OutboundMessage::Buttons { body, .. }
            | OutboundMessage::List { body, .. } => Some(body),
            OutboundMessage::Media { caption, .. } => caption.as_deref(),
            OutboundMessage::Location { name, .. } => Some(name),
        }
    }

    /// Every selectable id the message offers (buttons and list rows).
    pub fn choice_ids(&self) -> Vec<&str> {
        match self {
            OutboundMessage::Buttons { buttons, .. } => {
                buttons.iter().map(|b| b.id.as_str()).collect()
            }
            OutboundMessage::List { sections, .. } => sections
                .iter()
                .flat_map(|s| s.rows.iter().map(|r| r.id.as_str()))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// What an HTTP relay receives for every outbound message.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct OutgoingEnvelope {
    pub to: String,
    pub message: OutboundMessage,
    pub timestamp: DateTime<Utc>,
}

impl OutgoingEnvelope {
    pub fn new(to: impl Into<String>, message: OutboundMessage) -> Self {
        Self { to: to.into(), message, timestamp: Utc::now() }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Critical,
}

impl LogLevel {
    /// The `tracing` filter directive for this level.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Critical => "critical",
            other => other.as_directive(),
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown log level `{0}`")]
pub struct UnknownLogLevel(pub String);

impl FromStr for LogLevel {
    type Err = UnknownLogLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "critical" => Ok(LogLevel::Critical),
            other => Err(UnknownLogLevel(other.to_string())),
        }
    }
}
