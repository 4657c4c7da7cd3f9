use std::collections::HashMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::util::normalize_phrase;

/// A global command recognised before any per-flow logic runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CommandAction {
    /// Back to the default flow's entry step with data cleared.
    Reset,
    /// Static help text, position unchanged.
    Help,
    /// One level up: the default entry step.
    Back,
}

#[derive(Debug, Clone)]
pub struct CommandInterceptor {
    vocabulary: HashMap<String, CommandAction>,
}

impl Default for CommandInterceptor {
    fn default() -> Self {
        let mut vocabulary = HashMap::new();
        for phrase in ["menu", "main menu", "start"] {
            vocabulary.insert(phrase.to_string(), CommandAction::Reset);
        }
        vocabulary.insert("help".to_string(), CommandAction::Help);
        vocabulary.insert("back".to_string(), CommandAction::Back);
        Self { vocabulary }
    }
}

impl CommandInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alias(mut self, phrase: &str, action: CommandAction) -> Self {
        let phrase = normalize_phrase(phrase);
        if !phrase.is_empty() {
            self.vocabulary.insert(phrase, action);
        }
        self
    }

    /// Only the free-text channel is inspected; button and list replies are
    /// never treated as commands.
    pub fn try_intercept(&self, free_text: Option<&str>) -> Option<CommandAction> {
        let phrase = normalize_phrase(free_text?);
        self.vocabulary.get(&phrase).copied()
    }
}
