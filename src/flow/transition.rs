use tracing::debug;

use crate::{
    flow::{StepResult, registry::FlowRegistry, session::Session},
    state::merge_data,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Stay,
    Step { from: String, to: String },
    Handoff { from_flow: String, to_flow: String, to_step: String },
}

impl Transition {
    pub fn is_handoff(&self) -> bool {
        matches!(self, Transition::Handoff { .. })
    }
}

/// Applies a handler's `StepResult` to the session it ran against.
#[derive(Debug, Clone, Copy)]
pub struct TransitionController {
    reset_data_on_flow_change: bool,
}

impl Default for TransitionController {
    fn default() -> Self {
        Self {
            reset_data_on_flow_change: true,
        }
    }
}

impl TransitionController {
    pub fn new(reset_data_on_flow_change: bool) -> Self {
        Self {
            reset_data_on_flow_change,
        }
    }

    pub fn apply(
        &self,
        session: &mut Session,
        result: StepResult,
        registry: &FlowRegistry,
    ) -> Transition {
        let StepResult {
            next_flow,
            next_step,
            data,
        } = result;

        if let Some(to_flow) = next_flow {
            let from_flow = std::mem::take(&mut session.current_flow);
            // stale keys from the previous flow are dropped, the handoff payload is kept
            if self.reset_data_on_flow_change && from_flow != to_flow {
                session.data.clear();
            }
            if let Some(data) = data {
                merge_data(&mut session.data, data);
            }
            let to_step = next_step.unwrap_or_else(|| registry.entry_step_of(&to_flow).to_string());
            debug!(
                "Handoff {} -> {}/{} for {}",
                from_flow, to_flow, to_step, session.user
            );
            session.move_to(to_flow.clone(), to_step.clone());
            return Transition::Handoff {
                from_flow,
                to_flow,
                to_step,
            };
        }

        if let Some(data) = data {
            merge_data(&mut session.data, data);
        }

        match next_step {
            Some(to) => {
                let from = std::mem::replace(&mut session.current_step, to.clone());
                Transition::Step { from, to }
            }
            None => Transition::Stay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{FlowError, FlowHandler, StepContext};
    use crate::state::StateValue;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Arc;

    #[derive(Debug)]
    struct Stub(&'static str, &'static str);

    #[async_trait]
    impl FlowHandler for Stub {
        fn name(&self) -> &str {
            self.0
        }
        fn entry_step(&self) -> &str {
            self.1
        }
        async fn process_step(&self, _ctx: &StepContext<'_>) -> Result<StepResult, FlowError> {
            Ok(StepResult::stay())
        }
    }

    fn registry() -> FlowRegistry {
        FlowRegistry::builder()
            .register(Arc::new(Stub("main", "welcome")))
            .register(Arc::new(Stub("booking", "start")))
            .default_flow("main")
            .build()
            .unwrap()
    }

    fn session() -> Session {
        let mut s = Session::new("u1", None, "main", "main_menu", Utc::now());
        s.data.insert("greeted".into(), true.into());
        s
    }

    #[test]
    fn stay_keeps_step_but_merges_data() {
        let mut s = session();
        let t = TransitionController::default().apply(
            &mut s,
            StepResult::stay().with("attempts", 1i64),
            &registry(),
        );
        assert_eq!(t, Transition::Stay);
        assert_eq!(s.position(), ("main", "main_menu"));
        assert_eq!(s.data.len(), 2);
    }

    #[test]
    fn step_moves_within_flow() {
        let mut s = session();
        let t = TransitionController::default().apply(&mut s, StepResult::goto("feedback"), &registry());
        assert_eq!(
            t,
            Transition::Step {
                from: "main_menu".into(),
                to: "feedback".into()
            }
        );
        assert_eq!(s.position(), ("main", "feedback"));
    }

    #[test]
    fn next_flow_wins_over_next_step_and_uses_entry_step() {
        let mut s = session();
        let t = TransitionController::default().apply(
            &mut s,
            StepResult::handoff("booking").with("source", "menu"),
            &registry(),
        );
        assert!(t.is_handoff());
        assert_eq!(s.position(), ("booking", "start"));
        assert_eq!(s.data.len(), 1, "old flow data should be cleared");
        assert_eq!(s.data["source"], StateValue::from("menu"));

        let mut s = session();
        TransitionController::default().apply(
            &mut s,
            StepResult::handoff_to("booking", "form"),
            &registry(),
        );
        assert_eq!(s.position(), ("booking", "form"));
    }

    #[test]
    fn data_kept_when_reset_disabled_or_flow_unchanged() {
        let mut s = session();
        TransitionController::new(false).apply(&mut s, StepResult::handoff("booking"), &registry());
        assert!(s.data.contains_key("greeted"));

        let mut s = session();
        TransitionController::default().apply(&mut s, StepResult::handoff("main"), &registry());
        assert_eq!(s.position(), ("main", "welcome"));
        assert!(s.data.contains_key("greeted"));
    }

    #[test]
    fn unknown_target_uses_conventional_entry() {
        let mut s = session();
        TransitionController::default().apply(&mut s, StepResult::handoff("ghost"), &registry());
        assert_eq!(s.position(), ("ghost", "start"));
    }
}
