//! Session-level cancellation bookkeeping (§5): a hierarchical
//! [`CancelToken`] per active session, from which the plan/step/tool
//! tokens passed into `AgentRunner`/`ToolRegistry` calls are derived.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::session::SessionKey;
use crate::utils::CancelToken;

#[derive(Default)]
pub struct InterruptRegistry {
    sessions: Mutex<FxHashMap<SessionKey, CancelToken>>,
}

impl InterruptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The session-root token, creating one if this is the session's first
    /// active request.
    pub fn session_token(&self, session: &SessionKey) -> CancelToken {
        self.sessions
            .lock()
            .entry(session.clone())
            .or_insert_with(CancelToken::new)
            .clone()
    }

    /// Cancel is idempotent (§4.7, §8): cancelling an already-cancelled or
    /// never-started session is a no-op.
    pub fn cancel_session(&self, session: &SessionKey) {
        if let Some(token) = self.sessions.lock().get(session) {
            token.cancel();
        }
    }

    /// Replace the session's root token with a fresh one, e.g. once the
    /// session returns to `Idle`/`Terminal` and a later request should not
    /// inherit a prior cancellation.
    pub fn reset_session(&self, session: &SessionKey) {
        self.sessions.lock().insert(session.clone(), CancelToken::new());
    }

    pub fn remove_session(&self, session: &SessionKey) {
        self.sessions.lock().remove(session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_on_unknown_session_is_a_no_op() {
        let registry = InterruptRegistry::new();
        registry.cancel_session(&SessionKey::new("acme", "ghost"));
    }

    #[test]
    fn reset_clears_a_prior_cancellation() {
        let registry = InterruptRegistry::new();
        let session = SessionKey::new("acme", "s1");
        let token = registry.session_token(&session);
        registry.cancel_session(&session);
        assert!(token.is_cancelled());

        registry.reset_session(&session);
        let fresh = registry.session_token(&session);
        assert!(!fresh.is_cancelled());
    }
}
