use std::{sync::Arc, time::Duration, time::Instant};

use chat_message::{InboundMessage, OutboundMessage};
use chrono::Utc;
use moka::future::Cache;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{Instrument, Level, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::{
    channel::{MessageSink, Outbox},
    flow::{
        StepInput,
        commands::{CommandAction, CommandInterceptor},
        dispatcher::{DispatchOutcome, StepDispatcher},
        registry::FlowRegistry,
        session::{Session, SessionStore},
        transition::TransitionController,
    },
    logger::TurnMetrics,
    util::render_template,
};

/// Fewer hops than this would make a plain menu → flow → entry handoff impossible.
pub const MIN_HOP_BUDGET: usize = 2;
pub const DEFAULT_HOP_BUDGET: usize = 4;
pub const DEFAULT_HELP_TEXT: &str = "Hi {{name}}! Tap a button to choose an option, or type *menu* to start over, *back* to go back and *help* to see this message again.";
pub const DEFAULT_APOLOGY_TEXT: &str =
    "Sorry, something went wrong on our side. Let's start again from the main menu.";

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub hop_budget: usize,
    /// Handlebars template, `{{name}}` is the user's display name.
    pub help_text: String,
    /// Sent once per turn when the session had to be sent back to the default flow.
    pub apology_text: Option<String>,
    pub reset_data_on_flow_change: bool,
    pub interceptor: CommandInterceptor,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            hop_budget: DEFAULT_HOP_BUDGET,
            help_text: DEFAULT_HELP_TEXT.to_string(),
            apology_text: Some(DEFAULT_APOLOGY_TEXT.to_string()),
            reset_data_on_flow_change: true,
            interceptor: CommandInterceptor::default(),
        }
    }
}

/// What happened while processing one inbound message.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct TurnOutcome {
    pub turn_id: String,
    pub user: String,
    /// Position the session was left at.
    pub flow: String,
    pub step: String,
    /// Handoffs applied during the turn.
    pub hops: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandAction>,
    /// True when the session was sent back to the default flow.
    pub fell_back: bool,
    pub messages_sent: usize,
    /// Messages the sink refused or could not deliver.
    #[serde(default)]
    pub messages_failed: usize,
}

#[derive(Debug, Default)]
struct TurnState {
    hops: usize,
    fell_back: bool,
    apologized: bool,
}

/// Entry point for inbound messages: one turn per message, serialized per user.
#[derive(Debug)]
pub struct FlowManager {
    dispatcher: StepDispatcher,
    transitions: TransitionController,
    interceptor: CommandInterceptor,
    store: SessionStore,
    sink: MessageSink,
    hop_budget: usize,
    help_text: String,
    apology_text: Option<String>,
    locks: Cache<String, Arc<Mutex<()>>>, // user → turn lock
    metrics: TurnMetrics,
}

impl FlowManager {
    pub fn new(
        registry: FlowRegistry,
        store: SessionStore,
        sink: MessageSink,
        settings: ManagerSettings,
    ) -> Arc<Self> {
        let hop_budget = settings.hop_budget.max(MIN_HOP_BUDGET);
        if hop_budget != settings.hop_budget {
            warn!(
                "Hop budget {} raised to minimum {}",
                settings.hop_budget, MIN_HOP_BUDGET
            );
        }

        let locks = Cache::builder()
            .time_to_idle(Duration::from_secs(60 * 60))
            .build();

        Arc::new(Self {
            dispatcher: StepDispatcher::new(registry),
            transitions: TransitionController::new(settings.reset_data_on_flow_change),
            interceptor: settings.interceptor,
            store,
            sink,
            hop_budget,
            help_text: settings.help_text,
            apology_text: settings.apology_text.filter(|t| !t.trim().is_empty()),
            locks,
            metrics: TurnMetrics::new(),
        })
    }

    pub fn registry(&self) -> &FlowRegistry {
        self.dispatcher.registry()
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn hop_budget(&self) -> usize {
        self.hop_budget
    }

    /// All sessions that have not expired.
    pub async fn sessions(&self) -> Vec<Session> {
        self.store.list_active().await
    }

    pub async fn end_session(&self, user: &str) {
        let lock = self.lock_for(user).await;
        let _guard = lock.lock().await;
        self.store.delete(user).await;
    }

    pub async fn handle_message(&self, message: InboundMessage) -> TurnOutcome {
        let turn_id = Uuid::new_v4().to_string();
        let span = info_span!("turn", turn_id = %turn_id, user = %message.user);
        let started = Instant::now();

        let outcome = self.run_turn(turn_id, &message).instrument(span).await;

        let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;
        self.metrics.record(&outcome, elapsed_ms);
        tracing::event!(
            target: "turn",
            Level::INFO,
            turn_id = %outcome.turn_id,
            user = %outcome.user,
            flow = %outcome.flow,
            step = %outcome.step,
            hops = outcome.hops,
            command = ?outcome.command,
            fell_back = outcome.fell_back,
            messages_sent = outcome.messages_sent,
            messages_failed = outcome.messages_failed,
            latency_ms = elapsed_ms,
        );
        outcome
    }

    async fn lock_for(&self, user: &str) -> Arc<Mutex<()>> {
        self.locks
            .get_with(user.to_string(), async { Arc::new(Mutex::new(())) })
            .await
    }

    async fn run_turn(&self, turn_id: String, message: &InboundMessage) -> TurnOutcome {
        let lock = self.lock_for(&message.user).await;
        let _guard = lock.lock().await;

        let outbox = Outbox::new(self.sink.clone(), message.user.clone());
        let mut session = self.load_or_create(message).await;
        let mut turn = TurnState::default();

        let text = message.free_text();
        let command = self.interceptor.try_intercept(text);
        let input = match command {
            None => Some(StepInput::new(text, message.choice_id())),
            Some(CommandAction::Help) => {
                let name = session.display_name.as_deref().unwrap_or("Friend");
                let help = render_template(&self.help_text, &json!({ "name": name }));
                outbox.send(OutboundMessage::text(help)).await;
                None
            }
            Some(CommandAction::Reset) => {
                self.reset(&mut session);
                Some(StepInput::empty())
            }
            Some(CommandAction::Back) => {
                let (flow, step) = self.registry().default_entry();
                if session.current_flow == flow {
                    session.move_to(flow, step);
                } else {
                    self.reset(&mut session);
                }
                Some(StepInput::empty())
            }
        };
        if let Some(command) = command {
            info!("Command {:?} from {}", command, message.user);
        }

        if let Some(input) = input {
            self.drive(&mut session, input, &outbox, &mut turn).await;
        }
        self.persist(&mut session).await;

        TurnOutcome {
            turn_id,
            user: session.user.clone(),
            flow: session.current_flow.clone(),
            step: session.current_step.clone(),
            hops: turn.hops,
            command,
            fell_back: turn.fell_back,
            messages_sent: outbox.sent(),
            messages_failed: outbox.failed(),
        }
    }

    /// Runs the current step, then keeps following handoffs until a step
    /// stays put, the hop budget runs out or a second failure occurs.
    async fn drive(
        &self,
        session: &mut Session,
        mut input: StepInput<'_>,
        outbox: &Outbox,
        turn: &mut TurnState,
    ) {
        let mut redirected = false;
        loop {
            match self.dispatcher.dispatch(session, input, outbox).await {
                DispatchOutcome::Completed(result) => {
                    if result.is_handoff() && turn.hops >= self.hop_budget {
                        warn!(
                            "Hop budget of {} exhausted for {} at {}/{}",
                            self.hop_budget, session.user, session.current_flow, session.current_step
                        );
                        self.reset(session);
                        turn.fell_back = true;
                        self.apologize(outbox, turn).await;
                        return;
                    }

                    let transition = self.transitions.apply(session, result, self.registry());
                    if !transition.is_handoff() {
                        return;
                    }
                    turn.hops += 1;
                    debug!("{:?} (hop {})", transition, turn.hops);
                    self.persist(session).await;
                    input = StepInput::empty();
                }
                DispatchOutcome::Redirect(e) => {
                    turn.fell_back = true;
                    self.reset(session);
                    if redirected {
                        error!(
                            "Default entry failed for {} after redirect: {}",
                            session.user, e
                        );
                        return;
                    }
                    redirected = true;
                    warn!("Redirecting {} to default flow: {}", session.user, e);
                    self.apologize(outbox, turn).await;
                    input = StepInput::empty();
                }
            }
        }
    }

    async fn load_or_create(&self, message: &InboundMessage) -> Session {
        let mut session = match self.store.get(&message.user).await {
            Some(session) => session,
            None => {
                let (flow, step) = self.registry().default_entry();
                info!("New session for {} at {}/{}", message.user, flow, step);
                Session::new(message.user.clone(), None, flow, step, Utc::now())
            }
        };
        if let Some(name) = message.display_name.as_deref().map(str::trim) {
            if !name.is_empty() {
                session.display_name = Some(name.to_string());
            }
        }
        session
    }

    fn reset(&self, session: &mut Session) {
        let (flow, step) = self.registry().default_entry();
        session.move_to(flow, step);
        session.data.clear();
    }

    /// At most one apology per turn.
    async fn apologize(&self, outbox: &Outbox, turn: &mut TurnState) {
        if turn.apologized {
            return;
        }
        turn.apologized = true;
        if let Some(text) = &self.apology_text {
            outbox.send(OutboundMessage::text(text.clone())).await;
        }
    }

    async fn persist(&self, session: &mut Session) {
        let user = session.user.clone();
        if let Err(e) = self.store.put(&user, session).await {
            error!("Could not persist session for {}: {}", user, e);
        }
    }
}
