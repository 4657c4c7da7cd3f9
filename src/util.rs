use std::fmt::Debug;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use handlebars::Handlebars;
use once_cell::sync::Lazy;
use serde::Serialize;
use tracing::warn;

/// Source of "now" for session stamping and expiry.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Used to exercise expiry.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

static TEMPLATES: Lazy<Handlebars<'static>> = Lazy::new(|| {
    let mut registry = Handlebars::new();
    // chat text, not HTML
    registry.register_escape_fn(handlebars::no_escape);
    registry
});

/// Render a handlebars template; a broken template is returned verbatim.
pub fn render_template<T: Serialize>(template: &str, ctx: &T) -> String {
    match TEMPLATES.render_template(template, ctx) {
        Ok(rendered) => rendered,
        Err(e) => {
            warn!("template render failed: {}", e);
            template.to_string()
        }
    }
}

/// Lowercase, trim and collapse inner whitespace.
pub fn normalize_phrase(input: &str) -> String {
    input
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
