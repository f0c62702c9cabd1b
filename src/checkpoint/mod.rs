//! Durable, versioned snapshots of session state keyed by
//! `(tenant_id, session_id, version)` (§4.2). The Checkpointer is the
//! **synchronization boundary**: any state transition not yet checkpointed
//! is re-executed on recovery.

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorKind;
use crate::message::Message;
use crate::orchestrator::state::OrchestratorState;
use crate::session::{PendingInterrupt, PlanStep, Session, SessionKey};

pub use memory::InMemoryCheckpointer;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteCheckpointer;

/// A durable, versioned snapshot of one session (§3). History is stored
/// inline (one of the two layouts §6 allows); `history_hwm` is the number
/// of entries that were durable as of this version, so a backend that
/// later chooses the side-table layout can still answer "how much of
/// history does this checkpoint vouch for" without re-deriving it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub tenant_id: String,
    pub session_id: String,
    pub version: u64,
    pub state: OrchestratorState,
    pub plan: Vec<PlanStep>,
    pub history: Vec<Message>,
    pub history_hwm: u64,
    pub pending_interrupt: Option<PendingInterrupt>,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn from_session(session: &Session) -> Self {
        Self {
            tenant_id: session.key.tenant_id.clone(),
            session_id: session.key.session_id.clone(),
            version: session.version,
            state: session.state.clone(),
            plan: session.plan.clone(),
            history: session.history.clone(),
            history_hwm: session.history.len() as u64,
            pending_interrupt: session.pending_interrupt.clone(),
            created_at: Utc::now(),
        }
    }

    pub fn into_session(self) -> Session {
        Session {
            key: SessionKey::new(self.tenant_id, self.session_id),
            history: self.history,
            step_index: self.plan.iter().filter(|s| s.status.is_terminal()).count() as u32,
            state: self.state,
            plan: self.plan,
            pending_interrupt: self.pending_interrupt,
            version: self.version,
        }
    }
}

#[derive(Debug, Error)]
#[cfg_attr(feature = "diagnostics", derive(miette::Diagnostic))]
pub enum CheckpointerError {
    #[error("no checkpoint found for session {tenant_id}/{session_id}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(agentloom::checkpointer::not_found)))]
    NotFound { tenant_id: String, session_id: String },

    #[error("checkpointer backend error: {message}")]
    #[cfg_attr(
        feature = "diagnostics",
        diagnostic(
            code(agentloom::checkpointer::backend),
            help("Check the underlying store's connectivity and migrations.")
        )
    )]
    Backend { message: String },

    #[error("checkpointer error: {message}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(agentloom::checkpointer::other)))]
    Other { message: String },
}

impl CheckpointerError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }
}

pub type Result<T> = std::result::Result<T, CheckpointerError>;

/// Contract for durable checkpoint storage (§4.2). Writes must be atomic
/// and durable before the orchestrator reports a transition complete.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    async fn save(&self, checkpoint: Checkpoint) -> Result<u64>;

    async fn load_latest(&self, tenant_id: &str, session_id: &str) -> Result<Option<Checkpoint>>;

    /// Returns the latest version at or before `version` (§4.2) — not
    /// necessarily an exact match, so a caller can ask for "checkpoint as
    /// of step 5" even if a checkpoint was only taken at step 3.
    async fn load_at(
        &self,
        tenant_id: &str,
        session_id: &str,
        version: u64,
    ) -> Result<Option<Checkpoint>>;

    async fn list_versions(
        &self,
        tenant_id: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<u64>>;

    async fn prune(&self, tenant_id: &str, session_id: &str, keep_last: usize) -> Result<usize>;
}
