//! `ToolRegistry` (§4.4): validates inputs, enforces timeouts, retries
//! transient failures, and serialises non-idempotent calls per
//! `(session, tool)` so replay after a crash can't double-execute them.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{instrument, warn};

use super::descriptor::ToolDescriptor;
use super::retry::validate_against_schema;
use crate::error::ErrorKind;
use crate::session::SessionKey;
use crate::utils::CancelToken;

/// Which tools a tenant/agent pair may call; built from the permissions
/// catalog (§6) and narrowed further by `AgentSpec::permitted_tools`.
#[derive(Debug, Clone, Default)]
pub struct ToolPolicy {
    allowed: HashSet<String>,
}

impl ToolPolicy {
    pub fn new(allowed: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allow_all() -> Self {
        Self {
            allowed: HashSet::new(),
        }
    }

    pub fn allows(&self, tool_name: &str, unrestricted: bool) -> bool {
        unrestricted || self.allowed.contains(tool_name)
    }
}

#[derive(Debug, Error)]
#[cfg_attr(feature = "diagnostics", derive(miette::Diagnostic))]
pub enum ToolInvocationError {
    #[error("tool `{name}` rejected its inputs: {reason}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(agentloom::tools::validation)))]
    Validation { name: String, reason: String },

    #[error("agent is not permitted to call tool `{name}`")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(agentloom::tools::permission)))]
    Permission { name: String },

    #[error("tool `{name}` did not respond within {timeout_ms}ms")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(agentloom::tools::timeout)))]
    Timeout { name: String, timeout_ms: u64 },

    #[error("tool `{name}` failed transiently: {message}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(agentloom::tools::transient)))]
    Transient { name: String, message: String },

    #[error("tool `{name}` failed permanently: {message}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(agentloom::tools::permanent)))]
    Permanent { name: String, message: String },

    #[error("tool `{name}` was cancelled")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(agentloom::tools::cancelled)))]
    Cancelled { name: String },

    #[error("unknown tool `{name}`")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(agentloom::tools::unknown)))]
    Unknown { name: String },
}

impl ToolInvocationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolInvocationError::Validation { .. } => ErrorKind::Validation,
            ToolInvocationError::Permission { .. } => ErrorKind::Permission,
            ToolInvocationError::Timeout { .. } => ErrorKind::Timeout,
            ToolInvocationError::Transient { .. } => ErrorKind::ToolTransient,
            ToolInvocationError::Permanent { .. } | ToolInvocationError::Unknown { .. } => {
                ErrorKind::ToolPermanent
            }
            ToolInvocationError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }
}

/// Per-call context passed to a [`ToolHandler`].
#[derive(Clone)]
pub struct ToolContext {
    pub session: SessionKey,
    pub invocation_id: String,
    pub cancel: CancelToken,
}

/// One concrete tool implementation. No built-in handlers ship with this
/// crate (per scope) — callers register their own (HTTP clients, DB
/// lookups, etc.) against a descriptor from the tools catalog.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, inputs: Value, ctx: &ToolContext) -> Result<Value, ToolInvocationError>;
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    handler: Arc<dyn ToolHandler>,
}

struct InFlight {
    cancel: CancelToken,
    acknowledged: Arc<Notify>,
    /// Set once a cancelled call fails to acknowledge within
    /// [`CANCEL_GRACE`] — the handler may still be running with unknown
    /// effect, so replay on reentry must not assume it never ran.
    abandoned: Arc<AtomicBool>,
}

/// How long `cancel` waits for a cooperative acknowledgement before
/// abandoning the invocation (§5).
const CANCEL_GRACE: Duration = Duration::from_secs(5);

pub struct ToolRegistry {
    tools: FxHashMap<String, RegisteredTool>,
    session_locks: Mutex<FxHashMap<(SessionKey, String), Arc<tokio::sync::Mutex<()>>>>,
    in_flight: Mutex<FxHashMap<String, InFlight>>,
    /// Invocation ids abandoned mid-flight, kept after the call exits
    /// `in_flight` so replay on reentry can still detect and act on them.
    abandoned: Mutex<HashSet<String>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: FxHashMap::default(),
            session_locks: Mutex::new(FxHashMap::default()),
            in_flight: Mutex::new(FxHashMap::default()),
            abandoned: Mutex::new(HashSet::new()),
        }
    }

    pub fn register(&mut self, descriptor: ToolDescriptor, handler: Arc<dyn ToolHandler>) {
        self.tools
            .insert(descriptor.name.clone(), RegisteredTool { descriptor, handler });
    }

    pub fn describe(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name).map(|t| &t.descriptor)
    }

    pub fn list_for_policy(&self, policy: &ToolPolicy, unrestricted: bool) -> Vec<ToolDescriptor> {
        self.tools
            .values()
            .filter(|t| policy.allows(&t.descriptor.name, unrestricted))
            .map(|t| t.descriptor.clone())
            .collect()
    }

    fn session_lock(&self, session: &SessionKey, tool_name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let key = (session.clone(), tool_name.to_string());
        self.session_locks
            .lock()
            .entry(key)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    #[instrument(skip(self, inputs, policy), err)]
    pub async fn invoke(
        &self,
        name: &str,
        inputs: Value,
        session: &SessionKey,
        invocation_id: &str,
        cancel: CancelToken,
        policy: &ToolPolicy,
        unrestricted: bool,
    ) -> Result<Value, ToolInvocationError> {
        let Some(entry) = self.tools.get(name) else {
            return Err(ToolInvocationError::Unknown { name: name.to_string() });
        };
        if !policy.allows(name, unrestricted) {
            return Err(ToolInvocationError::Permission { name: name.to_string() });
        }
        validate_against_schema(&inputs, &entry.descriptor.input_schema).map_err(|reason| {
            ToolInvocationError::Validation {
                name: name.to_string(),
                reason,
            }
        })?;

        let lock = (!entry.descriptor.idempotent).then(|| self.session_lock(session, name));
        let _guard = match &lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let acknowledged = Arc::new(Notify::new());
        let abandoned = Arc::new(AtomicBool::new(false));
        self.in_flight.lock().insert(
            invocation_id.to_string(),
            InFlight {
                cancel: cancel.clone(),
                acknowledged: Arc::clone(&acknowledged),
                abandoned: Arc::clone(&abandoned),
            },
        );
        let result = self
            .invoke_with_retry(entry, inputs, session, invocation_id, cancel, &abandoned)
            .await;
        acknowledged.notify_waiters();
        self.in_flight.lock().remove(invocation_id);
        if abandoned.load(Ordering::SeqCst) {
            self.abandoned.lock().insert(invocation_id.to_string());
        }
        result
    }

    /// True if `invocation_id` was cancelled but its handler never
    /// acknowledged within [`CANCEL_GRACE`] — its effects are unknown, so
    /// replay on reentry should reconcile before reissuing (§5).
    pub fn is_abandoned(&self, invocation_id: &str) -> bool {
        self.abandoned.lock().contains(invocation_id)
    }

    /// Clears the abandoned marker once replay has reconciled the
    /// invocation (reissued it or confirmed its prior effect).
    pub fn clear_abandoned(&self, invocation_id: &str) {
        self.abandoned.lock().remove(invocation_id);
    }

    async fn invoke_with_retry(
        &self,
        entry: &RegisteredTool,
        inputs: Value,
        session: &SessionKey,
        invocation_id: &str,
        cancel: CancelToken,
        abandoned: &AtomicBool,
    ) -> Result<Value, ToolInvocationError> {
        let descriptor = &entry.descriptor;
        let ctx = ToolContext {
            session: session.clone(),
            invocation_id: invocation_id.to_string(),
            cancel: cancel.clone(),
        };

        for attempt in 1..=descriptor.retry_policy.max_attempts {
            if cancel.is_cancelled() {
                return Err(ToolInvocationError::Cancelled {
                    name: descriptor.name.clone(),
                });
            }

            let mut call = entry.handler.call(inputs.clone(), &ctx);
            let timeout = Duration::from_millis(descriptor.timeout_ms);
            let outcome = tokio::select! {
                result = tokio::time::timeout(timeout, &mut call) => result,
                _ = cancel.cancelled() => {
                    // Give the handler a cooperative window to finish or
                    // notice the cancellation itself before we abandon it.
                    tokio::time::timeout(CANCEL_GRACE, &mut call).await
                }
            };

            match outcome {
                Err(_elapsed) => {
                    if cancel.is_cancelled() {
                        warn!(tool = %descriptor.name, invocation_id, "tool did not acknowledge cancellation within grace period, abandoning");
                        abandoned.store(true, Ordering::SeqCst);
                        return Err(ToolInvocationError::Cancelled {
                            name: descriptor.name.clone(),
                        });
                    }
                    if attempt == descriptor.retry_policy.max_attempts {
                        return Err(ToolInvocationError::Timeout {
                            name: descriptor.name.clone(),
                            timeout_ms: descriptor.timeout_ms,
                        });
                    }
                }
                Ok(Err(ToolInvocationError::Transient { message, .. })) => {
                    if attempt == descriptor.retry_policy.max_attempts {
                        return Err(ToolInvocationError::Permanent {
                            name: descriptor.name.clone(),
                            message,
                        });
                    }
                    warn!(tool = %descriptor.name, attempt, "tool call failed transiently, retrying");
                    tokio::time::sleep(descriptor.retry_policy.delay_for_attempt(attempt)).await;
                }
                Ok(other) => return other,
            }
        }
        unreachable!("retry loop always returns before exhausting max_attempts")
    }

    /// Cooperative cancellation: signals the tool and waits up to
    /// [`CANCEL_GRACE`] for it to acknowledge before giving up (§4.4, §5).
    pub async fn cancel(&self, invocation_id: &str) -> bool {
        let Some(in_flight) = self.in_flight.lock().get(invocation_id).map(|f| {
            (f.cancel.clone(), Arc::clone(&f.acknowledged))
        }) else {
            return false;
        };
        let (cancel, acknowledged) = in_flight;
        cancel.cancel();
        tokio::time::timeout(CANCEL_GRACE, acknowledged.notified())
            .await
            .is_ok()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl ToolHandler for EchoTool {
        async fn call(&self, inputs: Value, _ctx: &ToolContext) -> Result<Value, ToolInvocationError> {
            Ok(inputs)
        }
    }

    struct FlakyTool {
        failures_remaining: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl ToolHandler for FlakyTool {
        async fn call(&self, inputs: Value, _ctx: &ToolContext) -> Result<Value, ToolInvocationError> {
            if self.failures_remaining.fetch_sub(1, std::sync::atomic::Ordering::SeqCst) > 0 {
                return Err(ToolInvocationError::Transient {
                    name: "flaky".into(),
                    message: "temporary".into(),
                });
            }
            Ok(inputs)
        }
    }

    fn session() -> SessionKey {
        SessionKey::new("acme", "s1")
    }

    #[tokio::test]
    async fn invoke_validates_required_fields() {
        let mut registry = ToolRegistry::new();
        let descriptor = ToolDescriptor::new("search", "1")
            .with_schemas(json!({"type":"object","required":["query"]}), json!({}));
        registry.register(descriptor, Arc::new(EchoTool));

        let err = registry
            .invoke(
                "search",
                json!({}),
                &session(),
                "inv_1",
                CancelToken::new(),
                &ToolPolicy::allow_all(),
                true,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn invoke_rejects_tools_outside_policy() {
        let mut registry = ToolRegistry::new();
        registry.register(ToolDescriptor::new("search", "1"), Arc::new(EchoTool));

        let err = registry
            .invoke(
                "search",
                json!({}),
                &session(),
                "inv_1",
                CancelToken::new(),
                &ToolPolicy::new(["other_tool"]),
                false,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);
    }

    #[tokio::test]
    async fn transient_failures_retry_then_succeed() {
        let mut registry = ToolRegistry::new();
        let descriptor = ToolDescriptor::new("flaky", "1")
            .with_retry_policy(super::super::descriptor::RetryPolicy::new(3, 1, 5));
        registry.register(
            descriptor,
            Arc::new(FlakyTool {
                failures_remaining: std::sync::atomic::AtomicU32::new(2),
            }),
        );

        let result = registry
            .invoke(
                "flaky",
                json!({"ok": true}),
                &session(),
                "inv_1",
                CancelToken::new(),
                &ToolPolicy::allow_all(),
                true,
            )
            .await
            .unwrap();
        assert_eq!(result, json!({"ok": true}));
    }

    #[tokio::test]
    async fn exhausted_retries_surface_as_permanent() {
        let mut registry = ToolRegistry::new();
        let descriptor = ToolDescriptor::new("flaky", "1")
            .with_retry_policy(super::super::descriptor::RetryPolicy::new(2, 1, 5));
        registry.register(
            descriptor,
            Arc::new(FlakyTool {
                failures_remaining: std::sync::atomic::AtomicU32::new(10),
            }),
        );

        let err = registry
            .invoke(
                "flaky",
                json!({}),
                &session(),
                "inv_1",
                CancelToken::new(),
                &ToolPolicy::allow_all(),
                true,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolPermanent);
    }
}
