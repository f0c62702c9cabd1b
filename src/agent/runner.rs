//! AgentRunner (§4.6): runs one agent for one turn. Malformed model output
//! is retried once under a stricter prompt, then surfaced as a permanent
//! error — the runner never silently drops a turn.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{instrument, warn};

use super::action::AgentAction;
use super::spec::AgentSpec;
use crate::context::ContextBundle;
use crate::error::ErrorKind;
use crate::utils::CancelToken;

#[derive(Debug, Error)]
#[cfg_attr(feature = "diagnostics", derive(miette::Diagnostic))]
pub enum AgentRunnerError {
    #[error("agent `{agent_name}` produced a malformed action after retry: {reason}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(agentloom::agent::malformed_output)))]
    MalformedOutput { agent_name: String, reason: String },

    #[error("model backend failed for agent `{agent_name}`: {message}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(agentloom::agent::model)))]
    ModelBackend { agent_name: String, message: String },

    #[error("agent `{agent_name}` turn was cancelled")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(agentloom::agent::cancelled)))]
    Cancelled { agent_name: String },
}

impl AgentRunnerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentRunnerError::MalformedOutput { .. } => ErrorKind::Validation,
            AgentRunnerError::ModelBackend { .. } => ErrorKind::Model,
            AgentRunnerError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }
}

/// Backend that turns `(agent_spec, context_bundle)` into one raw,
/// possibly-malformed action. Concrete model integrations (provider SDKs,
/// prompt templates) are out of scope for this crate (§1 Non-goals) —
/// callers implement this trait against whichever model client they use.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn complete_turn(
        &self,
        agent_spec: &AgentSpec,
        context: &ContextBundle,
        retry_hint: Option<&str>,
    ) -> Result<AgentAction, String>;
}

pub struct AgentRunner<M: ModelBackend> {
    backend: M,
}

impl<M: ModelBackend> AgentRunner<M> {
    pub fn new(backend: M) -> Self {
        Self { backend }
    }

    /// Run one agent turn. Retries exactly once under a stricter prompt if
    /// the backend reports malformed output, then surfaces a permanent
    /// `AgentRunnerError::MalformedOutput` (§4.6).
    pub async fn run_turn(
        &self,
        agent_spec: &AgentSpec,
        context: &ContextBundle,
        cancel: CancelToken,
    ) -> Result<AgentAction, AgentRunnerError> {
        run_turn_dyn(&self.backend, agent_spec, context, cancel).await
    }
}

/// Dyn-compatible version of [`AgentRunner::run_turn`], used by the
/// Orchestrator which holds an `Arc<dyn ModelBackend>` roster rather than a
/// monomorphic `AgentRunner<M>` per agent.
#[instrument(skip(backend, context, cancel), fields(agent = %agent_spec.name), err)]
pub async fn run_turn_dyn(
    backend: &(impl ModelBackend + ?Sized),
    agent_spec: &AgentSpec,
    context: &ContextBundle,
    cancel: CancelToken,
) -> Result<AgentAction, AgentRunnerError> {
    if cancel.is_cancelled() {
        return Err(AgentRunnerError::Cancelled {
            agent_name: agent_spec.name.clone(),
        });
    }

    match backend.complete_turn(agent_spec, context, None).await {
        Ok(action) => Ok(action),
        Err(reason) => {
            warn!(agent = %agent_spec.name, reason = %reason, "malformed agent action, retrying once");
            backend
                .complete_turn(agent_spec, context, Some(&reason))
                .await
                .map_err(|reason| AgentRunnerError::MalformedOutput {
                    agent_name: agent_spec.name.clone(),
                    reason,
                })
        }
    }
}
