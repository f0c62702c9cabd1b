//! ContextAssembler (§4.5): builds a [`ContextBundle`] for one agent
//! invocation. Pure given its inputs and a MemoryStore snapshot — the same
//! inputs produce the same bundle within a single step.

pub mod budget;

use std::collections::HashSet;

use serde::Serialize;
use thiserror::Error;

use crate::agent::spec::{AgentSpec, PeerSummary};
use crate::memory_store::MemoryStore;
use crate::message::Message;
use crate::session::{PlanStep, Session};
use crate::tools::{ToolDescriptor, ToolPolicy, ToolRegistry};

/// Computed per agent invocation; never persisted as primary state (§3).
#[derive(Debug, Clone, Serialize)]
pub struct ContextBundle {
    pub turns: Vec<Message>,
    pub memory: Vec<(crate::memory_store::MemoryItem, f64)>,
    pub tools: Vec<ToolDescriptor>,
    pub peers: Vec<PeerSummary>,
    pub current_step: PlanStep,
    pub step_tool_results: Vec<Message>,
    /// Step title plus the latest user message, for a future embedding
    /// backend to encode into `query_embedding` before calling
    /// `MemoryStore::search` (§4.5 step 1). Unused by the recency/pin
    /// scoring `search` does today.
    pub query_text: String,
    /// Ids that must never be dropped by budget enforcement: the
    /// triggering user message and this step's form round-trip.
    #[serde(skip)]
    pub triggering_message_ids: HashSet<String>,
}

#[derive(Debug, Error)]
#[cfg_attr(feature = "diagnostics", derive(miette::Diagnostic))]
pub enum ContextAssemblerError {
    #[error("plan step {index} not found in session")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(agentloom::context::missing_step)))]
    StepNotFound { index: u32 },
}

pub type Result<T> = std::result::Result<T, ContextAssemblerError>;

#[derive(Debug, Clone)]
pub struct ContextAssemblerConfig {
    /// Per-agent-configurable; default 12 (§4.5).
    pub k_turns: usize,
    pub top_m_memory: usize,
    pub min_memory_score: f64,
    pub token_budget: usize,
}

impl Default for ContextAssemblerConfig {
    fn default() -> Self {
        Self {
            k_turns: 12,
            top_m_memory: 8,
            min_memory_score: 0.05,
            token_budget: 8_000,
        }
    }
}

pub struct ContextAssembler {
    config: ContextAssemblerConfig,
}

impl ContextAssembler {
    pub fn new(config: ContextAssemblerConfig) -> Self {
        Self { config }
    }

    pub fn assemble(
        &self,
        session: &Session,
        target: &AgentSpec,
        roster: &[AgentSpec],
        memory: &MemoryStore,
        tools: &ToolRegistry,
        policy: &ToolPolicy,
    ) -> Result<ContextBundle> {
        let step_index = session.state.executing_step().unwrap_or(session.step_index);
        let current_step = session
            .plan
            .iter()
            .find(|s| s.index == step_index)
            .cloned()
            .ok_or(ContextAssemblerError::StepNotFound { index: step_index })?;
        Ok(self.assemble_with_step(session, current_step, target, roster, memory, tools, policy))
    }

    /// Like [`Self::assemble`] but takes an explicit, possibly synthetic,
    /// `current_step` rather than looking one up in `session.plan`. Used
    /// for the `Validating`/`Planning` phases, which run before any
    /// `PlanStep` exists (§4.7).
    pub fn assemble_with_step(
        &self,
        session: &Session,
        current_step: PlanStep,
        target: &AgentSpec,
        roster: &[AgentSpec],
        memory: &MemoryStore,
        tools: &ToolRegistry,
        policy: &ToolPolicy,
    ) -> ContextBundle {
        let step_index = current_step.index;
        let (turns, triggering_message_ids) = self.select_turns(session, step_index);

        let query_text = format!(
            "{} {}",
            current_step.title,
            session
                .history
                .iter()
                .rev()
                .find(|m| m.has_role(crate::message::Role::User))
                .map(format_message_for_query)
                .unwrap_or_default()
        );
        let scored_memory = memory.search(&session.key, None, self.config.top_m_memory, self.config.min_memory_score);

        let agent_permits_unrestricted = target.permitted_tools.is_empty();
        let tool_descriptors = tools.list_for_policy(policy, agent_permits_unrestricted);

        let peers = roster
            .iter()
            .filter(|a| a.name != target.name)
            .map(PeerSummary::from)
            .collect();

        let step_tool_results = session
            .history
            .iter()
            .filter(|m| m.step_index == step_index)
            .filter(|m| {
                matches!(
                    m.kind,
                    crate::message::MessageKind::ToolCall { .. }
                        | crate::message::MessageKind::ToolResult { .. }
                )
            })
            .cloned()
            .collect();

        let mut bundle = ContextBundle {
            turns,
            memory: scored_memory,
            tools: tool_descriptors,
            peers,
            current_step,
            step_tool_results,
            query_text,
            triggering_message_ids,
        };
        budget::enforce_token_budget(&mut bundle, self.config.token_budget);
        bundle
    }

    /// Last K turns, plus the triggering user message and any
    /// `agent_form_request`/`user_form_reply` pair in the current step,
    /// regardless of how far back they fall (§4.5 step 1).
    fn select_turns(&self, session: &Session, step_index: u32) -> (Vec<Message>, HashSet<String>) {
        let mut must_keep_ids = HashSet::new();

        let triggering = session
            .history
            .iter()
            .rev()
            .find(|m| m.has_role(crate::message::Role::User) && m.step_index <= step_index);
        if let Some(m) = triggering {
            must_keep_ids.insert(m.id.clone());
        }

        let recent: Vec<Message> = session
            .history
            .iter()
            .rev()
            .take(self.config.k_turns)
            .cloned()
            .collect();

        let mut turns: Vec<Message> = recent;
        for m in &session.history {
            if (m.is_pinned_by_default() && m.step_index == step_index) || must_keep_ids.contains(&m.id) {
                if !turns.iter().any(|t| t.id == m.id) {
                    turns.push(m.clone());
                }
            }
        }
        turns.sort_by_key(|m| m.timestamp);
        (turns, must_keep_ids)
    }
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(ContextAssemblerConfig::default())
    }
}

fn format_message_for_query(m: &Message) -> String {
    match &m.kind {
        crate::message::MessageKind::UserText { text, .. } => text.clone(),
        _ => String::new(),
    }
}
