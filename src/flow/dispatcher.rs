use std::{any::Any, panic::AssertUnwindSafe};

use futures::FutureExt;
use tracing::{debug, error, warn};

use crate::{
    channel::Outbox,
    flow::{FlowError, StepContext, StepInput, StepResult, registry::FlowRegistry, session::Session},
};

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The handler ran and returned a result for the transition controller.
    Completed(StepResult),
    /// The step could not run; the caller must send the session back to the
    /// default flow.
    Redirect(FlowError),
}

/// Runs exactly one step of the session's current flow. Nothing a handler
/// does, including panicking, escapes this boundary.
#[derive(Debug, Clone)]
pub struct StepDispatcher {
    registry: FlowRegistry,
}

impl StepDispatcher {
    pub fn new(registry: FlowRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &FlowRegistry {
        &self.registry
    }

    pub async fn dispatch(
        &self,
        session: &Session,
        input: StepInput<'_>,
        outbox: &Outbox,
    ) -> DispatchOutcome {
        let Some(handler) = self.registry.resolve(&session.current_flow) else {
            warn!(
                "Unknown flow {} for user {}, redirecting",
                session.current_flow, session.user
            );
            return DispatchOutcome::Redirect(FlowError::UnknownFlow(session.current_flow.clone()));
        };

        debug!(
            "Dispatching {}/{} for {}",
            session.current_flow, session.current_step, session.user
        );
        let ctx = StepContext::new(session, input, outbox);
        match AssertUnwindSafe(handler.process_step(&ctx)).catch_unwind().await {
            Ok(Ok(result)) => DispatchOutcome::Completed(result),
            Ok(Err(e)) => {
                error!(
                    "Flow {} failed at step {}: {}",
                    session.current_flow, session.current_step, e
                );
                DispatchOutcome::Redirect(e)
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!(
                    "Flow {} panicked at step {}: {}",
                    session.current_flow, session.current_step, reason
                );
                DispatchOutcome::Redirect(FlowError::Panicked(reason))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
