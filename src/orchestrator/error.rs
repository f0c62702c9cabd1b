//! `OrchestratorError`: the top-level error type, wrapping every
//! component's own error behind one `kind()` classification (§7, §10.2).

use thiserror::Error;

use crate::agent::AgentRunnerError;
use crate::checkpoint::CheckpointerError;
use crate::context::ContextAssemblerError;
use crate::error::ErrorKind;
use crate::tools::ToolInvocationError;

#[derive(Debug, Error)]
#[cfg_attr(feature = "diagnostics", derive(miette::Diagnostic))]
pub enum OrchestratorError {
    #[error("checkpoint failure: {0}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(agentloom::orchestrator::checkpoint)))]
    Checkpoint(#[from] CheckpointerError),

    #[error("agent runner failure: {0}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(agentloom::orchestrator::agent)))]
    Agent(#[from] AgentRunnerError),

    #[error("tool invocation failure: {0}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(agentloom::orchestrator::tool)))]
    Tool(#[from] ToolInvocationError),

    #[error("context assembly failure: {0}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(agentloom::orchestrator::context)))]
    Context(#[from] ContextAssemblerError),

    #[error("no session found for {tenant_id}/{session_id}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(agentloom::orchestrator::no_session)))]
    NoSuchSession { tenant_id: String, session_id: String },

    #[error("unknown agent `{0}` referenced by plan step")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(agentloom::orchestrator::unknown_agent)))]
    UnknownAgent(String),

    #[error("unknown workflow `{0}`")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(agentloom::orchestrator::unknown_workflow)))]
    UnknownWorkflow(String),

    #[error("form reply id `{0}` does not match any outstanding form_request")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(agentloom::orchestrator::form_mismatch)))]
    FormReplyMismatch(String),

    #[error("invariant violated: {0}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(agentloom::orchestrator::internal)))]
    Internal(String),
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::Checkpoint(_) | OrchestratorError::Internal(_) => ErrorKind::Internal,
            OrchestratorError::Agent(e) => e.kind(),
            OrchestratorError::Tool(e) => e.kind(),
            OrchestratorError::Context(_) => ErrorKind::Internal,
            OrchestratorError::NoSuchSession { .. } | OrchestratorError::UnknownAgent(_)
            | OrchestratorError::UnknownWorkflow(_) | OrchestratorError::FormReplyMismatch(_) => {
                ErrorKind::Validation
            }
        }
    }
}
