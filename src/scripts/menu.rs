use async_trait::async_trait;
use chat_message::Button;
use serde_json::json;
use tracing::{debug, warn};

use crate::{
    flow::{FlowError, FlowHandler, StepContext, StepResult},
    util::render_template,
};

const WELCOME: &str = "🙏 Welcome {{name}}!\n\n\
I'm your WhatsApp Business Assistant. How can I help you today?\n\n\
*Choose an option below:*";

/// Landing flow: greets the user and routes the menu choice to the other flows.
#[derive(Debug, Default, Clone, Copy)]
pub struct MainMenuFlow;

impl MainMenuFlow {
    async fn welcome(&self, ctx: &StepContext<'_>) -> Result<StepResult, FlowError> {
        let text = render_template(WELCOME, &json!({ "name": ctx.display_name() }));
        ctx.send_buttons(
            text,
            vec![
                Button::new("book_demo", "📞 Book Demo"),
                Button::new("support", "🎧 Support"),
                Button::new("feedback", "📝 Feedback"),
            ],
        )
        .await;
        Ok(StepResult::goto("main_menu"))
    }

    async fn route(&self, ctx: &StepContext<'_>) -> Result<StepResult, FlowError> {
        debug!("Main menu choice {:?} from {}", ctx.choice(), ctx.user);
        match ctx.choice() {
            Some("book_demo") => Ok(StepResult::handoff("booking").with("source", "main_menu")),
            Some("support") => Ok(StepResult::handoff("support").with("support_type", "general")),
            Some("feedback") => Ok(StepResult::handoff("feedback")),
            _ => {
                ctx.send_text("Please select one of the options from the menu above 👆")
                    .await;
                Ok(StepResult::stay())
            }
        }
    }
}

#[async_trait]
impl FlowHandler for MainMenuFlow {
    fn name(&self) -> &str {
        "main"
    }

    fn entry_step(&self) -> &str {
        "welcome"
    }

    async fn process_step(&self, ctx: &StepContext<'_>) -> Result<StepResult, FlowError> {
        match ctx.step {
            "welcome" => self.welcome(ctx).await,
            "main_menu" => self.route(ctx).await,
            other => {
                warn!("Main flow has no step {}, greeting again", other);
                self.welcome(ctx).await
            }
        }
    }
}
