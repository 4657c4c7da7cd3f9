//! The conversation scripts that ship with the binary: a main menu that hands
//! off to demo booking, customer support and feedback flows.

pub mod booking;
pub mod feedback;
pub mod menu;
pub mod support;

use std::sync::Arc;

use anyhow::{Context, Result};
use rand::Rng;

use crate::flow::registry::FlowRegistry;

#[derive(Debug, Clone, Default)]
pub struct ScriptSettings {
    /// Base URL media attachments are served from. Media messages are skipped when unset.
    pub media_base_url: Option<String>,
}

/// Registry with every bundled flow, `default_flow` as the landing flow.
pub fn default_registry(default_flow: &str, settings: &ScriptSettings) -> Result<FlowRegistry> {
    let booking = booking::BookingFlow::new().context("compiling booking form validators")?;

    FlowRegistry::builder()
        .register(Arc::new(menu::MainMenuFlow))
        .register(Arc::new(booking))
        .register(Arc::new(support::SupportFlow))
        .register(Arc::new(feedback::FeedbackFlow::new(settings.media_base_url.clone())))
        .default_flow(default_flow)
        .build()
        .context("building flow registry")
}

/// Short human-friendly reference such as `DEMO042917`.
pub(crate) fn reference(prefix: &str) -> String {
    let n: u32 = rand::rng().random_range(0..1_000_000);
    format!("{}{:06}", prefix, n)
}
