//! Shared error-kind classification (§7).
//!
//! Every domain in this crate (agent runs, tool dispatch, checkpointing,
//! context assembly, configuration) defines its own `thiserror` enum, but
//! all of them answer `kind() -> ErrorKind` so the orchestrator can branch
//! on classification without matching every concrete variant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The eight error kinds recognized by the orchestrator's recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad user input or a malformed agent action.
    Validation,
    /// Tenant lacks rights for the requested tool/agent.
    Permission,
    /// Tool failure classified as retryable.
    ToolTransient,
    /// Tool failure that exhausted retries or is not retryable.
    ToolPermanent,
    /// A suspension point exceeded its deadline.
    Timeout,
    /// An explicit cancel reached this operation.
    Cancelled,
    /// The model backend itself failed or returned unusable output.
    Model,
    /// An invariant was violated; the session cannot continue safely.
    Internal,
}

impl ErrorKind {
    /// Whether the `ToolRegistry` may retry an error of this kind.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::ToolTransient)
    }

    /// Whether this kind leaves the session usable after the current step.
    pub fn is_recoverable(self) -> bool {
        !matches!(self, ErrorKind::Internal)
    }
}

/// A classified error record retained in session history for debugging.
///
/// Never exposed verbatim on the event stream (§7): user-visible failures
/// are always rendered as short markdown, this record is for replay and
/// postmortem only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorRecord {
    #[serde(default = "Utc::now")]
    pub when: DateTime<Utc>,
    pub kind: ErrorKind,
    pub scope: ErrorScope,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<ErrorRecord>>,
    #[serde(default)]
    pub context: serde_json::Value,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, scope: ErrorScope, message: impl Into<String>) -> Self {
        Self {
            when: Utc::now(),
            kind,
            scope,
            message: message.into(),
            cause: None,
            context: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_cause(mut self, cause: ErrorRecord) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}

impl std::fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ErrorRecord {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|c| c as &dyn std::error::Error)
    }
}

/// Where an error originated, mirroring the component that raised it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum ErrorScope {
    Agent { agent_name: String, step: u64 },
    Tool { tool_name: String, step: u64 },
    Checkpointer,
    ContextAssembler,
    #[default]
    Orchestrator,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_transient_is_retryable() {
        assert!(ErrorKind::ToolTransient.is_retryable());
        assert!(!ErrorKind::ToolPermanent.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
    }

    #[test]
    fn internal_is_not_recoverable() {
        assert!(!ErrorKind::Internal.is_recoverable());
        assert!(ErrorKind::Cancelled.is_recoverable());
    }

    #[test]
    fn error_record_chains_cause() {
        let cause = ErrorRecord::new(ErrorKind::ToolTransient, ErrorScope::Orchestrator, "flaky");
        let top = ErrorRecord::new(ErrorKind::ToolPermanent, ErrorScope::Orchestrator, "gave up")
            .with_cause(cause);
        assert!(std::error::Error::source(&top).is_some());
    }
}
