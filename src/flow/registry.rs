use std::{collections::HashMap, sync::Arc};

use thiserror::Error;
use tracing::info;

use crate::flow::{ENTRY_STEP, FlowHandler};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("flow name must not be empty")]
    EmptyName,
    #[error("flow `{0}` registered twice")]
    Duplicate(String),
    #[error("no flows registered")]
    Empty,
    #[error("default flow `{0}` is not registered")]
    UnknownDefault(String),
    #[error("no default flow configured")]
    NoDefault,
}

/// Immutable name → handler mapping, validated once at startup.
#[derive(Debug, Clone)]
pub struct FlowRegistry {
    flows: HashMap<String, Arc<dyn FlowHandler>>,
    default_flow: String,
}

impl FlowRegistry {
    pub fn builder() -> FlowRegistryBuilder {
        FlowRegistryBuilder::default()
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn FlowHandler>> {
        self.flows.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.flows.contains_key(name)
    }

    pub fn default_flow(&self) -> &str {
        &self.default_flow
    }

    /// The `(flow, step)` every new or reset session starts at.
    pub fn default_entry(&self) -> (String, String) {
        (
            self.default_flow.clone(),
            self.entry_step_of(&self.default_flow).to_string(),
        )
    }

    /// Entry step of `name`, falling back to the conventional one for unknown flows.
    pub fn entry_step_of(&self, name: &str) -> &str {
        self.flows
            .get(name)
            .map(|h| h.entry_step())
            .unwrap_or(ENTRY_STEP)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.flows.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}

#[derive(Default)]
pub struct FlowRegistryBuilder {
    flows: Vec<Arc<dyn FlowHandler>>,
    default_flow: Option<String>,
}

impl FlowRegistryBuilder {
    pub fn register(mut self, handler: Arc<dyn FlowHandler>) -> Self {
        self.flows.push(handler);
        self
    }

    pub fn default_flow(mut self, name: impl Into<String>) -> Self {
        self.default_flow = Some(name.into());
        self
    }

    pub fn build(self) -> Result<FlowRegistry, RegistryError> {
        if self.flows.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut flows = HashMap::with_capacity(self.flows.len());
        for handler in self.flows {
            let name = handler.name().trim().to_string();
            if name.is_empty() {
                return Err(RegistryError::EmptyName);
            }
            if flows.insert(name.clone(), handler).is_some() {
                return Err(RegistryError::Duplicate(name));
            }
        }

        let default_flow = self.default_flow.ok_or(RegistryError::NoDefault)?;
        if !flows.contains_key(&default_flow) {
            return Err(RegistryError::UnknownDefault(default_flow));
        }

        info!(
            "Flow registry built: {} flows, default={}",
            flows.len(),
            default_flow
        );
        Ok(FlowRegistry {
            flows,
            default_flow,
        })
    }
}
