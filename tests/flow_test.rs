// tests/flow_test.rs
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;

use async_trait::async_trait;
use chat_message::{InboundMessage, OutboundMessage};
use chatflow::channel::sink::RecordingSink;
use chatflow::flow::{
    FlowError, FlowHandler, StepContext, StepResult,
    commands::CommandAction,
    manager::{FlowManager, ManagerSettings},
    registry::FlowRegistry,
    session::{InMemorySessionStore, Session, SessionStoreType},
};
use chatflow::scripts::{ScriptSettings, default_registry, menu::MainMenuFlow};
use chatflow::state::StateValue;
use chatflow::util::{Clock, ManualClock};
use chrono::{TimeDelta, Utc};

#[derive(Debug)]
struct Home;

#[async_trait]
impl FlowHandler for Home {
    fn name(&self) -> &str {
        "home"
    }

    async fn process_step(&self, ctx: &StepContext<'_>) -> Result<StepResult, FlowError> {
        match ctx.step {
            "start" => {
                ctx.send_text("home").await;
                Ok(StepResult::goto("idle"))
            }
            _ => Ok(StepResult::stay()),
        }
    }
}

/// Hands off to `target` on every step.
#[derive(Debug)]
struct Bouncer {
    name: &'static str,
    target: &'static str,
}

#[async_trait]
impl FlowHandler for Bouncer {
    fn name(&self) -> &str {
        self.name
    }

    async fn process_step(&self, _ctx: &StepContext<'_>) -> Result<StepResult, FlowError> {
        Ok(StepResult::handoff(self.target).with("visited", self.name))
    }
}

#[derive(Debug, Default)]
struct Spy {
    calls: AtomicUsize,
}

#[async_trait]
impl FlowHandler for Spy {
    fn name(&self) -> &str {
        "spy"
    }

    async fn process_step(&self, _ctx: &StepContext<'_>) -> Result<StepResult, FlowError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(StepResult::stay())
    }
}

/// Read-modify-write of a counter with a yield in between.
#[derive(Debug)]
struct Counter;

#[async_trait]
impl FlowHandler for Counter {
    fn name(&self) -> &str {
        "counter"
    }

    async fn process_step(&self, ctx: &StepContext<'_>) -> Result<StepResult, FlowError> {
        let seen = ctx.data("count").and_then(StateValue::as_number).unwrap_or(0.0);
        tokio::time::sleep(Duration::from_millis(2)).await;
        Ok(StepResult::stay().with("count", seen + 1.0))
    }
}

fn manager_with(
    registry: FlowRegistry,
    store: Arc<InMemorySessionStore>,
) -> (Arc<FlowManager>, Arc<RecordingSink>) {
    let sink = RecordingSink::new();
    let manager = FlowManager::new(registry, store, sink.clone(), ManagerSettings::default());
    (manager, sink)
}

fn store() -> Arc<InMemorySessionStore> {
    InMemorySessionStore::new(TimeDelta::hours(24))
}

#[tokio::test]
async fn new_user_lands_on_menu_and_books_a_demo() {
    let registry = default_registry("main", &ScriptSettings::default()).unwrap();
    let (manager, sink) = manager_with(registry, store());

    let outcome = manager
        .handle_message(InboundMessage::text("+3161234", "hello").with_display_name("Ada"))
        .await;
    assert_eq!((outcome.flow.as_str(), outcome.step.as_str()), ("main", "main_menu"));
    assert_eq!(outcome.hops, 0);
    let greeting = sink.take();
    assert_eq!(greeting.len(), 1);
    assert!(greeting[0].1.body().unwrap().contains("Welcome Ada"));

    let outcome = manager
        .handle_message(InboundMessage::choice("+3161234", "book_demo"))
        .await;
    assert_eq!((outcome.flow.as_str(), outcome.step.as_str()), ("booking", "form"));
    assert_eq!(outcome.hops, 1);
    assert!(!outcome.fell_back);

    let session = manager.store().get("+3161234").await.unwrap();
    assert_eq!(session.data.get("source"), Some(&StateValue::from("main_menu")));
    assert_eq!(session.data.get("field"), Some(&StateValue::from("name")));
    assert_eq!(session.display_name.as_deref(), Some("Ada"));
}

#[tokio::test]
async fn mutual_handoff_stops_at_default_entry() {
    let registry = FlowRegistry::builder()
        .register(Arc::new(Home))
        .register(Arc::new(Bouncer { name: "ping", target: "pong" }))
        .register(Arc::new(Bouncer { name: "pong", target: "ping" }))
        .default_flow("home")
        .build()
        .unwrap();
    let store = store();
    let (manager, sink) = manager_with(registry, store.clone());

    let mut parked = Session::new("u1", None, "ping", "start", Utc::now());
    parked.data.insert("stale".into(), StateValue::from(true));
    store.insert_raw(parked);

    let outcome = manager.handle_message(InboundMessage::text("u1", "go")).await;

    assert_eq!((outcome.flow.as_str(), outcome.step.as_str()), ("home", "start"));
    assert_eq!(outcome.hops, manager.hop_budget());
    assert!(outcome.fell_back);
    let session = store.get("u1").await.unwrap();
    assert!(session.data.is_empty());
    // only the apology
    assert_eq!(sink.for_user("u1").len(), 1);
}

#[tokio::test]
async fn unknown_flow_is_redirected_without_panicking() {
    let registry = FlowRegistry::builder()
        .register(Arc::new(Home))
        .default_flow("home")
        .build()
        .unwrap();
    let store = store();
    let (manager, sink) = manager_with(registry, store.clone());
    store.insert_raw(Session::new("u1", None, "retired_flow", "step_3", Utc::now()));

    let outcome = manager.handle_message(InboundMessage::text("u1", "hi")).await;

    assert_eq!((outcome.flow.as_str(), outcome.step.as_str()), ("home", "idle"));
    assert!(outcome.fell_back);
    let sent = sink.for_user("u1");
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1], OutboundMessage::text("home"));
}

#[tokio::test]
async fn menu_keyword_is_intercepted_before_the_flow() {
    let spy = Arc::new(Spy::default());
    let registry = FlowRegistry::builder()
        .register(Arc::new(MainMenuFlow))
        .register(spy.clone())
        .default_flow("main")
        .build()
        .unwrap();
    let store = store();
    let (manager, _sink) = manager_with(registry, store.clone());

    for keyword in ["menu", "MENU", " Start "] {
        let mut parked = Session::new("u1", None, "spy", "waiting", Utc::now());
        parked.data.insert("draft".into(), StateValue::from("half done"));
        store.insert_raw(parked);

        let outcome = manager.handle_message(InboundMessage::text("u1", keyword)).await;

        assert_eq!(outcome.command, Some(CommandAction::Reset), "{keyword:?}");
        assert_eq!((outcome.flow.as_str(), outcome.step.as_str()), ("main", "main_menu"));
        assert!(store.get("u1").await.unwrap().data.is_empty());
    }
    assert_eq!(spy.calls.load(Ordering::SeqCst), 0);

    // non-keywords reach the flow
    store.insert_raw(Session::new("u1", None, "spy", "waiting", Utc::now()));
    manager.handle_message(InboundMessage::text("u1", "menu please")).await;
    assert_eq!(spy.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn repeated_menu_is_idempotent() {
    let registry = default_registry("main", &ScriptSettings::default()).unwrap();
    let (manager, _sink) = manager_with(registry, store());

    let first = manager.handle_message(InboundMessage::text("u1", "menu")).await;
    let second = manager.handle_message(InboundMessage::text("u1", "menu")).await;

    assert_eq!((first.flow, first.step), (second.flow.clone(), second.step.clone()));
    assert_eq!(second.step, "main_menu");
    assert!(manager.store().get("u1").await.unwrap().data.is_empty());
}

#[tokio::test]
async fn idle_session_expires_after_ttl() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let store = InMemorySessionStore::with_clock(TimeDelta::hours(24), clock.clone());
    let registry = default_registry("main", &ScriptSettings::default()).unwrap();
    let (manager, _sink) = manager_with(registry, store.clone());

    let mut parked = Session::new("u1", None, "booking", "form", clock.now());
    parked.data.insert("field".into(), StateValue::from("email"));
    store.insert_raw(parked);

    clock.advance(TimeDelta::hours(25));
    let outcome = manager.handle_message(InboundMessage::text("u1", "ada@example.com")).await;

    assert_eq!((outcome.flow.as_str(), outcome.step.as_str()), ("main", "main_menu"));
    assert!(!store.get("u1").await.unwrap().data.contains_key("field"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn turns_for_one_user_are_serialized() {
    let registry = FlowRegistry::builder()
        .register(Arc::new(Counter))
        .default_flow("counter")
        .build()
        .unwrap();
    let store = store();
    let (manager, _sink) = manager_with(registry, store.clone());

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .handle_message(InboundMessage::text("u1", format!("tick {i}")))
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let session = store.get("u1").await.unwrap();
    assert_eq!(session.data["count"].as_number(), Some(20.0));
}

#[tokio::test]
async fn ending_a_session_starts_over() {
    let registry = default_registry("main", &ScriptSettings::default()).unwrap();
    let (manager, _sink) = manager_with(registry, store());

    manager.handle_message(InboundMessage::text("u1", "hi")).await;
    manager.handle_message(InboundMessage::choice("u1", "support")).await;
    assert_eq!(manager.sessions().await[0].current_flow, "support");

    manager.end_session("u1").await;
    assert!(manager.sessions().await.is_empty());

    let outcome = manager.handle_message(InboundMessage::text("u1", "hi")).await;
    assert_eq!(outcome.flow, "main");
}
