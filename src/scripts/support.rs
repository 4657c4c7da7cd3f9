use async_trait::async_trait;
use chat_message::{Button, ListRow, ListSection, OutboundMessage};
use tracing::info;

use crate::{
    flow::{FlowError, FlowHandler, StepContext, StepResult},
    scripts::reference,
};

const FAQ: &str = "❓ *Frequently Asked Questions*\n\n\
*Q: App not loading?*\nA: Clear cache & restart\n\n\
*Q: Login issues?*\nA: Reset your password or create a ticket\n\n\
*Q: Slow performance?*\nA: Check your internet speed";

/// Customer support: FAQ, ticket creation and office location.
#[derive(Debug, Default, Clone, Copy)]
pub struct SupportFlow;

impl SupportFlow {
    async fn show_menu(&self, ctx: &StepContext<'_>) -> Result<StepResult, FlowError> {
        let intro = match ctx.data_str("booking_ref") {
            Some(booking_ref) => format!(
                "🛠️ *Support Center*\n\nHello {}! Need help with booking {}?",
                ctx.display_name(),
                booking_ref
            ),
            None => format!(
                "🛠️ *Support Center*\n\nHello {}! Welcome to our support center.",
                ctx.display_name()
            ),
        };
        ctx.send(OutboundMessage::list(
            format!("{}\n\n*How can I assist you?*", intro),
            "Support options",
            vec![
                ListSection {
                    title: "Self service".into(),
                    rows: vec![
                        ListRow::new("faq", "❓ FAQ").described("Answers to common questions"),
                        ListRow::new("visit", "📍 Visit us").described("Our office location"),
                    ],
                },
                ListSection {
                    title: "Talk to us".into(),
                    rows: vec![
                        ListRow::new("ticket", "🎫 Create ticket").described("Describe your issue"),
                        ListRow::new("main_menu", "🔙 Main menu"),
                    ],
                },
            ],
        ))
        .await;
        Ok(StepResult::goto("menu"))
    }

    async fn menu(&self, ctx: &StepContext<'_>) -> Result<StepResult, FlowError> {
        match ctx.choice() {
            Some("faq") => {
                ctx.send_text(FAQ).await;
                Ok(StepResult::stay())
            }
            Some("visit") => {
                ctx.send(OutboundMessage::Location {
                    latitude: 52.3676,
                    longitude: 4.9041,
                    name: "Support office".into(),
                    address: "Damrak 1, Amsterdam".into(),
                })
                .await;
                Ok(StepResult::stay())
            }
            Some("ticket") => {
                ctx.send_text("🎫 Please describe your issue in a few words:").await;
                Ok(StepResult::goto("ticket"))
            }
            Some("main_menu" | "back_to_main") => Ok(StepResult::handoff("main")),
            _ => {
                ctx.send_text("Please select one of the available options 👆").await;
                Ok(StepResult::stay())
            }
        }
    }

    async fn ticket(&self, ctx: &StepContext<'_>) -> Result<StepResult, FlowError> {
        if ctx.choice() == Some("main_menu") {
            return Ok(StepResult::handoff("main"));
        }

        let issue = ctx.text();
        if issue.chars().count() < 5 {
            ctx.send_text("Please tell us a bit more about the issue (at least 5 characters):")
                .await;
            return Ok(StepResult::stay());
        }

        let ticket_id = reference("TKT");
        info!("Ticket {} opened for {}", ticket_id, ctx.user);
        ctx.send_text(format!(
            "🎫 *Ticket Created*\n\nTicket ID: #{}\nStatus: Open ⏳\n\n\
             Our team will contact you within 2 hours. Keep this ID for reference.",
            ticket_id
        ))
        .await;
        ctx.send_buttons(
            "*Need anything else?*",
            vec![
                Button::new("support_menu", "🏠 Support Menu"),
                Button::new("main_menu", "🔙 Main Menu"),
            ],
        )
        .await;

        Ok(StepResult::goto("complete")
            .with("ticket_id", ticket_id)
            .with("issue", issue))
    }

    async fn complete(&self, ctx: &StepContext<'_>) -> Result<StepResult, FlowError> {
        match ctx.choice() {
            Some("support_menu") => self.show_menu(ctx).await,
            Some("main_menu") => Ok(StepResult::handoff("main")),
            _ => {
                ctx.send_text("Please select one of the available options 👆").await;
                Ok(StepResult::stay())
            }
        }
    }
}

#[async_trait]
impl FlowHandler for SupportFlow {
    fn name(&self) -> &str {
        "support"
    }

    async fn process_step(&self, ctx: &StepContext<'_>) -> Result<StepResult, FlowError> {
        match ctx.step {
            "start" => self.show_menu(ctx).await,
            "menu" => self.menu(ctx).await,
            "ticket" => self.ticket(ctx).await,
            "complete" => self.complete(ctx).await,
            other => Err(FlowError::UnknownStep {
                flow: "support".into(),
                step: other.into(),
            }),
        }
    }
}
