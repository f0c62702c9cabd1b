//! The eight orchestrator states (§4.7) and the transitions between them.

use serde::{Deserialize, Serialize};

/// One session's position in the orchestration state machine (§4.7).
///
/// Transitions always follow the discipline: append to history, update
/// `plan`/`state`, `Checkpointer::save`, then publish events. No state is
/// ever observed "live" without first being durable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OrchestratorState {
    /// No active request; waiting for a `user_text`/`user_form_reply`.
    Idle,
    /// Validating the incoming request before a plan is drafted.
    Validating,
    /// The planner agent is drafting/revising `Session::plan`.
    Planning,
    /// Step `index` of the plan is actively running.
    Executing(u32),
    /// Step `index` is suspended on a form with id `form_id`.
    AwaitingHuman(u32, String),
    /// Recovering from a transient failure; replaying unacknowledged work.
    Recovering,
    /// Assembling the final response from completed plan steps.
    Synthesizing,
    /// The session has reached a terminal outcome (success, failure, or
    /// cancellation) and will not transition further.
    Terminal,
}

impl OrchestratorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrchestratorState::Terminal)
    }

    /// Whether a `tool_call`/agent invocation may be in flight in this state.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            OrchestratorState::Planning
                | OrchestratorState::Executing(_)
                | OrchestratorState::Synthesizing
                | OrchestratorState::Recovering
        )
    }

    pub fn executing_step(&self) -> Option<u32> {
        match self {
            OrchestratorState::Executing(index) => Some(*index),
            OrchestratorState::AwaitingHuman(index, _) => Some(*index),
            _ => None,
        }
    }
}
