use async_trait::async_trait;
use chat_message::Button;
use regex::Regex;
use tracing::info;

use crate::{
    flow::{FlowError, FlowHandler, StepContext, StepResult},
    scripts::reference,
};

/// How a form answer is read and validated.
#[derive(Debug, Clone, Copy)]
enum Answer {
    /// Free text with at least `min_len` characters.
    Text { min_len: usize },
    Email,
    /// One of `(id, title)`, by button id or by typing the title.
    Choice(&'static [(&'static str, &'static str)]),
}

#[derive(Debug)]
struct Field {
    key: &'static str,
    prompt: &'static str,
    retry: &'static str,
    answer: Answer,
}

const TIMES: &[(&str, &str)] = &[
    ("today", "📅 Today"),
    ("tomorrow", "📅 Tomorrow"),
    ("this_week", "📅 This Week"),
];

/// Button title without its leading emoji.
fn label(title: &str) -> &str {
    title.trim_start_matches(|c: char| !c.is_alphanumeric()).trim()
}

const FIELDS: &[Field] = &[
    Field {
        key: "name",
        prompt: "📝 Please provide your full name:",
        retry: "Please provide a valid name:",
        answer: Answer::Text { min_len: 2 },
    },
    Field {
        key: "email",
        prompt: "📧 Great! Please provide your email address:",
        retry: "Please provide a valid email address:",
        answer: Answer::Email,
    },
    Field {
        key: "company",
        prompt: "🏢 Please provide your company name:",
        retry: "Please provide your company name:",
        answer: Answer::Text { min_len: 2 },
    },
    Field {
        key: "time",
        prompt: "📅 When would you prefer the demo?",
        retry: "Please pick one of the times below:",
        answer: Answer::Choice(TIMES),
    },
];

/// Demo booking: collects name, email, company and a preferred time, then
/// confirms with a booking reference.
///
/// Steps: `start` → `form` (once per field, tracked in the `field` data key) → `complete`.
#[derive(Debug, Clone)]
pub struct BookingFlow {
    email: Regex,
}

impl BookingFlow {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            email: Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$")?,
        })
    }

    fn field(key: &str) -> Option<(usize, &'static Field)> {
        FIELDS.iter().enumerate().find(|(_, f)| f.key == key)
    }

    async fn ask(&self, ctx: &StepContext<'_>, field: &Field, text: &str) {
        match field.answer {
            Answer::Choice(options) => {
                let buttons = options.iter().map(|(id, title)| Button::new(*id, *title)).collect();
                ctx.send_buttons(text, buttons).await;
            }
            _ => ctx.send_text(text).await,
        }
    }

    /// The validated answer to `field`, or `None` to re-prompt.
    fn read(&self, ctx: &StepContext<'_>, field: &Field) -> Option<String> {
        let text = ctx.text();
        match field.answer {
            Answer::Text { min_len } => (text.chars().count() >= min_len).then(|| text.to_string()),
            Answer::Email => self.email.is_match(text).then(|| text.to_lowercase()),
            Answer::Choice(options) => options
                .iter()
                .find(|(id, title)| {
                    ctx.choice() == Some(*id)
                        || text.eq_ignore_ascii_case(id)
                        || text.to_lowercase() == label(title).to_lowercase()
                })
                .map(|(_, title)| label(title).to_string()),
        }
    }

    async fn start(&self, ctx: &StepContext<'_>) -> Result<StepResult, FlowError> {
        ctx.send_text(format!(
            "📅 *Schedule Demo*\n\nGreat choice, {}! Let's get you set up for a personalized demo.",
            ctx.display_name()
        ))
        .await;
        let first = &FIELDS[0];
        self.ask(ctx, first, first.prompt).await;
        Ok(StepResult::goto("form").with("field", first.key))
    }

    async fn form(&self, ctx: &StepContext<'_>) -> Result<StepResult, FlowError> {
        if matches!(ctx.choice(), Some("main_menu" | "back_menu")) {
            return Ok(StepResult::handoff("main"));
        }

        let Some((index, field)) = ctx.data_str("field").and_then(Self::field) else {
            return self.start(ctx).await;
        };

        let Some(value) = self.read(ctx, field) else {
            self.ask(ctx, field, field.retry).await;
            return Ok(StepResult::stay());
        };

        match FIELDS.get(index + 1) {
            Some(next) => {
                self.ask(ctx, next, next.prompt).await;
                Ok(StepResult::goto("form")
                    .with(field.key, value)
                    .with("field", next.key))
            }
            None => self.confirm(ctx, field.key, value).await,
        }
    }

    async fn confirm(
        &self,
        ctx: &StepContext<'_>,
        last_key: &str,
        last_value: String,
    ) -> Result<StepResult, FlowError> {
        let answer = |key: &str| -> Result<String, FlowError> {
            if key == last_key {
                return Ok(last_value.clone());
            }
            ctx.data_str(key)
                .map(String::from)
                .ok_or_else(|| FlowError::MissingData(key.to_string()))
        };
        let name = answer("name")?;
        let email = answer("email")?;
        let company = answer("company")?;
        let time = answer("time")?;
        let booking_ref = reference("DEMO");

        info!("Demo booked for {}: ref={}", ctx.user, booking_ref);
        ctx.send_text(format!(
            "✅ *Demo Scheduled Successfully!*\n\n\
             *Booking Details:*\n\
             👤 Name: {name}\n\
             📧 Email: {email}\n\
             🏢 Company: {company}\n\
             📅 Preferred Time: {time}\n\
             🆔 Demo ID: {booking_ref}\n\n\
             📞 Our team will contact you within 2 hours to confirm the exact timing!"
        ))
        .await;
        ctx.send_buttons(
            "*What would you like to do next?*",
            vec![
                Button::new("support", "🎧 Support"),
                Button::new("main_menu", "🔙 Main Menu"),
            ],
        )
        .await;

        Ok(StepResult::goto("complete")
            .with(last_key, last_value.clone())
            .with("booking_ref", booking_ref))
    }

    async fn complete(&self, ctx: &StepContext<'_>) -> Result<StepResult, FlowError> {
        match ctx.choice() {
            Some("support") => {
                let mut result = StepResult::handoff_to("support", "start").with("support_type", "booking");
                if let Some(booking_ref) = ctx.data_str("booking_ref") {
                    result = result.with("booking_ref", booking_ref);
                }
                Ok(result)
            }
            Some("main_menu") => Ok(StepResult::handoff("main")),
            _ => {
                ctx.send_text("Please select one of the available options 👆").await;
                Ok(StepResult::stay())
            }
        }
    }
}

#[async_trait]
impl FlowHandler for BookingFlow {
    fn name(&self) -> &str {
        "booking"
    }

    async fn process_step(&self, ctx: &StepContext<'_>) -> Result<StepResult, FlowError> {
        match ctx.step {
            "start" => self.start(ctx).await,
            "form" => self.form(ctx).await,
            "complete" => self.complete(ctx).await,
            other => Err(FlowError::UnknownStep {
                flow: "booking".into(),
                step: other.into(),
            }),
        }
    }
}
