use async_trait::async_trait;
use chat_message::{Button, MediaKind, OutboundMessage};
use tracing::info;

use crate::flow::{FlowError, FlowHandler, StepContext, StepResult};

const RATINGS: &[(&str, &str)] = &[
    ("excellent", "⭐⭐⭐ Excellent"),
    ("good", "⭐⭐ Good"),
    ("poor", "⭐ Poor"),
];

#[derive(Debug, Default, Clone)]
pub struct FeedbackFlow {
    media_base_url: Option<String>,
}

impl FeedbackFlow {
    pub fn new(media_base_url: Option<String>) -> Self {
        Self { media_base_url }
    }

    async fn ask_rating(&self, ctx: &StepContext<'_>, body: &str) {
        let buttons = RATINGS.iter().map(|(id, title)| Button::new(*id, *title)).collect();
        ctx.send_buttons(body, buttons).await;
    }

    async fn start(&self, ctx: &StepContext<'_>) -> Result<StepResult, FlowError> {
        if let Some(base) = &self.media_base_url {
            ctx.send(OutboundMessage::media(
                MediaKind::Image,
                format!("{}/images/feedback-welcome.jpg", base.trim_end_matches('/')),
                Some("📝 Your feedback matters!".into()),
            ))
            .await;
        }
        let body = format!(
            "📝 *Feedback*\n\nHi {}! 👋 Your opinion helps us improve.\n\n*How was your experience?*",
            ctx.display_name()
        );
        self.ask_rating(ctx, &body).await;
        Ok(StepResult::goto("rating"))
    }

    async fn rating(&self, ctx: &StepContext<'_>) -> Result<StepResult, FlowError> {
        let picked = ctx
            .choice()
            .or_else(|| Some(ctx.text()))
            .map(str::to_lowercase)
            .filter(|r| RATINGS.iter().any(|(id, _)| *id == r.as_str()));

        let Some(rating) = picked else {
            self.ask_rating(ctx, "Please rate us with one of the buttons below:").await;
            return Ok(StepResult::stay());
        };

        ctx.send_buttons(
            "Anything you'd like to add? Type your comment, or tap Skip.",
            vec![Button::new("skip", "⏭️ Skip")],
        )
        .await;
        Ok(StepResult::goto("comment").with("rating", rating))
    }

    async fn comment(&self, ctx: &StepContext<'_>) -> Result<StepResult, FlowError> {
        let rating = ctx
            .data_str("rating")
            .ok_or_else(|| FlowError::MissingData("rating".into()))?;
        let comment = match ctx.choice() {
            Some("skip") => None,
            _ => Some(ctx.text()).filter(|c| !c.is_empty()),
        };

        info!(
            "Feedback from {}: rating={} comment={:?}",
            ctx.user, rating, comment
        );
        ctx.send_text("🙏 Thank you for your feedback!").await;
        Ok(StepResult::handoff("main"))
    }
}

#[async_trait]
impl FlowHandler for FeedbackFlow {
    fn name(&self) -> &str {
        "feedback"
    }

    async fn process_step(&self, ctx: &StepContext<'_>) -> Result<StepResult, FlowError> {
        match ctx.step {
            "start" => self.start(ctx).await,
            "rating" => self.rating(ctx).await,
            "comment" => self.comment(ctx).await,
            other => Err(FlowError::UnknownStep {
                flow: "feedback".into(),
                step: other.into(),
            }),
        }
    }
}
