//! Session, PlanStep, and the durable session-level state (§3).
//!
//! A `Session` is exclusively owned by its Orchestrator instance for the
//! duration of an active request; the Checkpointer owns the durable copy.
//! History entries are owned by the Session; `ContextBundle`s are transient
//! and owned by the `AgentRunner` invocation that consumes them.

use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::orchestrator::state::OrchestratorState;

/// Identifies a session uniquely across tenants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub tenant_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(tenant_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            session_id: session_id.into(),
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.session_id)
    }
}

/// Status of one [`PlanStep`] (§3). `Done`/`Failed`/`Skipped` are terminal
/// and immutable once reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    AwaitingUser,
    Done,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Done | StepStatus::Failed | StepStatus::Skipped)
    }
}

/// One unit of work in the orchestrator's plan, bound to a single agent (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub index: u32,
    pub title: String,
    pub agent_name: String,
    #[serde(default)]
    pub inputs: serde_json::Value,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<String>,
}

impl PlanStep {
    pub fn new(index: u32, title: impl Into<String>, agent_name: impl Into<String>) -> Self {
        Self {
            index,
            title: title.into(),
            agent_name: agent_name.into(),
            inputs: serde_json::Value::Null,
            status: StepStatus::Pending,
            output_ref: None,
        }
    }

    /// Rebind the agent bound to this step, e.g. on `delegate(agent_name)` (§4.7).
    ///
    /// Panics (caller bug, not user error) if the step already reached a
    /// terminal status — delegation is only valid while `Running`.
    pub fn rebind_agent(&mut self, agent_name: impl Into<String>) {
        assert!(
            !self.status.is_terminal(),
            "cannot rebind a terminal PlanStep"
        );
        self.agent_name = agent_name.into();
    }
}

/// A suspended form awaiting a matching `user_form_reply` (§4.7, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingInterrupt {
    pub step_index: u32,
    pub form_id: String,
    pub form: serde_json::Value,
}

/// Durable, in-memory view of one session (§3). The Checkpointer persists a
/// point-in-time copy of exactly these fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub key: SessionKey,
    pub history: Vec<Message>,
    pub step_index: u32,
    pub state: OrchestratorState,
    pub plan: Vec<PlanStep>,
    pub pending_interrupt: Option<PendingInterrupt>,
    pub version: u64,
}

impl Session {
    pub fn fresh(key: SessionKey) -> Self {
        Self {
            key,
            history: Vec::new(),
            step_index: 0,
            state: OrchestratorState::Idle,
            plan: Vec::new(),
            pending_interrupt: None,
            version: 0,
        }
    }

    /// Append a message and bump the monotonic version. Called as the first
    /// half of the orchestrator's transition discipline (§4.7): history is
    /// appended, then `plan`/`state` are updated, then the Checkpointer saves.
    pub fn append(&mut self, message: Message) {
        self.history.push(message);
        self.version += 1;
    }

    pub fn running_step(&self) -> Option<&PlanStep> {
        self.plan.iter().find(|s| s.status == StepStatus::Running)
    }

    /// Invariant check used in tests (§8): at most one `PlanStep` is
    /// `running` at any time.
    pub fn at_most_one_running(&self) -> bool {
        self.plan.iter().filter(|s| s.status == StepStatus::Running).count() <= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_session_starts_idle() {
        let s = Session::fresh(SessionKey::new("acme", "s1"));
        assert_eq!(s.state, OrchestratorState::Idle);
        assert_eq!(s.version, 0);
    }

    #[test]
    fn append_bumps_version_monotonically() {
        let mut s = Session::fresh(SessionKey::new("acme", "s1"));
        s.append(Message::user_text("hi"));
        s.append(Message::agent_markdown(0, "hello"));
        assert_eq!(s.version, 2);
        assert_eq!(s.history.len(), 2);
    }

    #[test]
    fn at_most_one_running_step() {
        let mut s = Session::fresh(SessionKey::new("acme", "s1"));
        s.plan.push(PlanStep::new(0, "plan", "planner"));
        s.plan.push(PlanStep::new(1, "act", "executor"));
        s.plan[0].status = StepStatus::Running;
        assert!(s.at_most_one_running());
        s.plan[1].status = StepStatus::Running;
        assert!(!s.at_most_one_running());
    }
}
