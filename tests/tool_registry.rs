//! `ToolRegistry::invoke` end to end (§4.4): permission/validation
//! rejection, retry-then-succeed, retry exhaustion, timeout, cancellation,
//! and per-`(session, tool)` serialisation of non-idempotent calls.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agentloom::session::SessionKey;
use agentloom::tools::{RetryPolicy, ToolContext, ToolDescriptor, ToolHandler, ToolInvocationError, ToolPolicy, ToolRegistry};
use agentloom::utils::CancelToken;
use async_trait::async_trait;
use serde_json::{Value, json};

struct EchoTool;

#[async_trait]
impl ToolHandler for EchoTool {
    async fn call(&self, inputs: Value, _ctx: &ToolContext) -> Result<Value, ToolInvocationError> {
        Ok(inputs)
    }
}

struct AlwaysTransient;

#[async_trait]
impl ToolHandler for AlwaysTransient {
    async fn call(&self, _inputs: Value, _ctx: &ToolContext) -> Result<Value, ToolInvocationError> {
        Err(ToolInvocationError::Transient {
            name: "flaky".to_string(),
            message: "backend hiccup".to_string(),
        })
    }
}

struct SucceedsAfter {
    remaining: AtomicU32,
}

#[async_trait]
impl ToolHandler for SucceedsAfter {
    async fn call(&self, _inputs: Value, _ctx: &ToolContext) -> Result<Value, ToolInvocationError> {
        if self.remaining.fetch_sub(1, Ordering::SeqCst) > 0 {
            return Err(ToolInvocationError::Transient {
                name: "flaky".to_string(),
                message: "backend hiccup".to_string(),
            });
        }
        Ok(json!({"ok": true}))
    }
}

struct SlowTool;

#[async_trait]
impl ToolHandler for SlowTool {
    async fn call(&self, _inputs: Value, _ctx: &ToolContext) -> Result<Value, ToolInvocationError> {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(json!({}))
    }
}

/// A tool that notices cancellation and unwinds promptly, the way a
/// well-behaved handler checks `ctx.cancel` instead of running to completion.
struct CooperativeTool;

#[async_trait]
impl ToolHandler for CooperativeTool {
    async fn call(&self, _inputs: Value, ctx: &ToolContext) -> Result<Value, ToolInvocationError> {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(10)) => Ok(json!({})),
            _ = ctx.cancel.cancelled() => Err(ToolInvocationError::Cancelled { name: "cooperative".into() }),
        }
    }
}

/// A tool that never looks at `ctx.cancel` and keeps running regardless —
/// stands in for a handler with no cancellation support.
struct UncooperativeTool;

#[async_trait]
impl ToolHandler for UncooperativeTool {
    async fn call(&self, _inputs: Value, _ctx: &ToolContext) -> Result<Value, ToolInvocationError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(json!({}))
    }
}

struct CountingTool {
    concurrent: Arc<AtomicU32>,
    max_seen: Arc<AtomicU32>,
}

#[async_trait]
impl ToolHandler for CountingTool {
    async fn call(&self, _inputs: Value, _ctx: &ToolContext) -> Result<Value, ToolInvocationError> {
        let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(15)).await;
        self.concurrent.fetch_sub(1, Ordering::SeqCst);
        Ok(json!({}))
    }
}

fn session() -> SessionKey {
    SessionKey::new("acme", "s1")
}

#[tokio::test]
async fn unknown_tool_is_rejected() {
    let registry = ToolRegistry::new();
    let result = registry
        .invoke("nope", json!({}), &session(), "inv-1", CancelToken::new(), &ToolPolicy::allow_all(), false)
        .await;
    assert!(matches!(result, Err(ToolInvocationError::Unknown { .. })));
}

#[tokio::test]
async fn policy_rejects_a_tool_not_on_the_allow_list() {
    let mut registry = ToolRegistry::new();
    registry.register(ToolDescriptor::new("echo", "1.0"), Arc::new(EchoTool));

    let policy = ToolPolicy::new(["other_tool"]);
    let result = registry
        .invoke("echo", json!({}), &session(), "inv-1", CancelToken::new(), &policy, false)
        .await;
    assert!(matches!(result, Err(ToolInvocationError::Permission { .. })));
}

#[tokio::test]
async fn unrestricted_bypasses_the_policy_allow_list() {
    let mut registry = ToolRegistry::new();
    registry.register(ToolDescriptor::new("echo", "1.0"), Arc::new(EchoTool));

    let policy = ToolPolicy::new(Vec::<String>::new());
    let result = registry
        .invoke("echo", json!({"x": 1}), &session(), "inv-1", CancelToken::new(), &policy, true)
        .await;
    assert_eq!(result.unwrap(), json!({"x": 1}));
}

#[tokio::test]
async fn malformed_inputs_fail_schema_validation() {
    let mut registry = ToolRegistry::new();
    let descriptor = ToolDescriptor::new("echo", "1.0").with_schemas(
        json!({"type": "object", "required": ["name"]}),
        json!({"type": "object"}),
    );
    registry.register(descriptor, Arc::new(EchoTool));

    let result = registry
        .invoke("echo", json!({}), &session(), "inv-1", CancelToken::new(), &ToolPolicy::allow_all(), false)
        .await;
    assert!(matches!(result, Err(ToolInvocationError::Validation { .. })));
}

#[tokio::test]
async fn transient_failures_retry_and_eventually_succeed() {
    let mut registry = ToolRegistry::new();
    registry.register(
        ToolDescriptor::new("flaky", "1.0").with_retry_policy(RetryPolicy::new(3, 1, 5)),
        Arc::new(SucceedsAfter {
            remaining: AtomicU32::new(2),
        }),
    );

    let result = registry
        .invoke("flaky", json!({}), &session(), "inv-1", CancelToken::new(), &ToolPolicy::allow_all(), false)
        .await;
    assert_eq!(result.unwrap(), json!({"ok": true}));
}

#[tokio::test]
async fn transient_failures_become_permanent_once_retries_are_exhausted() {
    let mut registry = ToolRegistry::new();
    registry.register(
        ToolDescriptor::new("flaky", "1.0").with_retry_policy(RetryPolicy::new(2, 1, 5)),
        Arc::new(AlwaysTransient),
    );

    let result = registry
        .invoke("flaky", json!({}), &session(), "inv-1", CancelToken::new(), &ToolPolicy::allow_all(), false)
        .await;
    assert!(matches!(result, Err(ToolInvocationError::Permanent { .. })));
}

#[tokio::test]
async fn a_slow_tool_times_out() {
    let mut registry = ToolRegistry::new();
    registry.register(
        ToolDescriptor::new("slow", "1.0").with_timeout_ms(20).with_retry_policy(RetryPolicy::none()),
        Arc::new(SlowTool),
    );

    let result = registry
        .invoke("slow", json!({}), &session(), "inv-1", CancelToken::new(), &ToolPolicy::allow_all(), false)
        .await;
    assert!(matches!(result, Err(ToolInvocationError::Timeout { .. })));
}

/// §4.4/§5: cancelling a handler that notices `ctx.cancel` and unwinds
/// promptly surfaces as `Cancelled` well within the grace window, with no
/// abandoned marker left behind.
#[tokio::test]
async fn a_cancelled_token_aborts_a_cooperative_call() {
    let mut registry = ToolRegistry::new();
    registry.register(
        ToolDescriptor::new("cooperative", "1.0").with_retry_policy(RetryPolicy::none()),
        Arc::new(CooperativeTool),
    );

    let cancel = CancelToken::new();
    let registry = Arc::new(registry);
    let registry_for_call = Arc::clone(&registry);
    let cancel_for_call = cancel.clone();
    let call = tokio::spawn(async move {
        registry_for_call
            .invoke("cooperative", json!({}), &session(), "inv-1", cancel_for_call, &ToolPolicy::allow_all(), false)
            .await
    });

    tokio::time::sleep(Duration::from_millis(10)).await;
    cancel.cancel();
    let result = call.await.unwrap();
    assert!(matches!(result, Err(ToolInvocationError::Cancelled { .. })));
    assert!(!registry.is_abandoned("inv-1"));
}

/// §4.4/§5: a handler that never notices cancellation outlives the grace
/// window, so the registry abandons the invocation and marks it for replay
/// to reconcile rather than reporting it as cleanly cancelled.
#[tokio::test(start_paused = true)]
async fn a_cancelled_call_with_no_cooperation_is_abandoned_after_grace() {
    let mut registry = ToolRegistry::new();
    registry.register(
        ToolDescriptor::new("uncooperative", "1.0").with_retry_policy(RetryPolicy::none()),
        Arc::new(UncooperativeTool),
    );

    let cancel = CancelToken::new();
    let registry = Arc::new(registry);
    let registry_for_call = Arc::clone(&registry);
    let cancel_for_call = cancel.clone();
    let call = tokio::spawn(async move {
        registry_for_call
            .invoke(
                "uncooperative",
                json!({}),
                &session(),
                "inv-1",
                cancel_for_call,
                &ToolPolicy::allow_all(),
                false,
            )
            .await
    });

    tokio::time::sleep(Duration::from_millis(10)).await;
    cancel.cancel();
    let result = call.await.unwrap();
    assert!(matches!(result, Err(ToolInvocationError::Cancelled { .. })));
    assert!(registry.is_abandoned("inv-1"));

    registry.clear_abandoned("inv-1");
    assert!(!registry.is_abandoned("inv-1"));
}

/// §4.4: non-idempotent calls against the same `(session, tool)` pair are
/// serialised so a checkpoint replay can't double-execute a side effect.
#[tokio::test]
async fn non_idempotent_calls_for_the_same_session_and_tool_are_serialised() {
    let concurrent = Arc::new(AtomicU32::new(0));
    let max_seen = Arc::new(AtomicU32::new(0));

    let mut registry = ToolRegistry::new();
    registry.register(
        ToolDescriptor::new("charge_card", "1.0").with_side_effects(agentloom::tools::SideEffects::External, false),
        Arc::new(CountingTool {
            concurrent: Arc::clone(&concurrent),
            max_seen: Arc::clone(&max_seen),
        }),
    );
    let registry = Arc::new(registry);
    let key = session();

    let mut handles = Vec::new();
    for i in 0..4 {
        let registry = Arc::clone(&registry);
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            registry
                .invoke(
                    "charge_card",
                    json!({}),
                    &key,
                    &format!("inv-{i}"),
                    CancelToken::new(),
                    &ToolPolicy::allow_all(),
                    false,
                )
                .await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
}
