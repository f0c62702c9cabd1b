//! Shared fixtures for the orchestrator integration tests: scripted
//! `ModelBackend`s that stand in for a real model call, and a trivial
//! `ToolHandler` for exercising the tool-dispatch path end to end.

use std::sync::Arc;

use agentloom::agent::{AgentAction, AgentSpec, ModelBackend, ModelHandle};
use agentloom::context::ContextBundle;
use agentloom::tools::{ToolContext, ToolHandler, ToolInvocationError};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

/// Replays a fixed queue of actions, one per `complete_turn` call. Panics
/// if called more times than the queue has entries — a test bug, not a
/// runtime one.
pub struct QueueBackend {
    actions: Mutex<std::collections::VecDeque<AgentAction>>,
}

impl QueueBackend {
    pub fn new(actions: Vec<AgentAction>) -> Arc<Self> {
        Arc::new(Self {
            actions: Mutex::new(actions.into()),
        })
    }
}

#[async_trait]
impl ModelBackend for QueueBackend {
    async fn complete_turn(
        &self,
        _agent_spec: &AgentSpec,
        _context: &ContextBundle,
        _retry_hint: Option<&str>,
    ) -> Result<AgentAction, String> {
        self.actions
            .lock()
            .pop_front()
            .ok_or_else(|| "QueueBackend exhausted".to_string())
    }
}

/// Always returns the same action, for agents invoked exactly once.
pub struct FixedBackend {
    action: AgentAction,
}

impl FixedBackend {
    pub fn new(action: AgentAction) -> Arc<Self> {
        Arc::new(Self { action })
    }
}

#[async_trait]
impl ModelBackend for FixedBackend {
    async fn complete_turn(
        &self,
        _agent_spec: &AgentSpec,
        _context: &ContextBundle,
        _retry_hint: Option<&str>,
    ) -> Result<AgentAction, String> {
        Ok(self.action.clone())
    }
}

pub fn agent(name: &str) -> AgentSpec {
    AgentSpec::new(name, "test fixture agent", ModelHandle::new("test", "test-model"))
}

/// A tool handler backed by a plain closure, for tests that just need some
/// deterministic `Value -> Value` mapping with no external dependency.
pub struct FnTool<F>(pub F)
where
    F: Fn(Value) -> Result<Value, ToolInvocationError> + Send + Sync;

#[async_trait]
impl<F> ToolHandler for FnTool<F>
where
    F: Fn(Value) -> Result<Value, ToolInvocationError> + Send + Sync,
{
    async fn call(&self, inputs: Value, _ctx: &ToolContext) -> Result<Value, ToolInvocationError> {
        (self.0)(inputs)
    }
}

/// A handler that fails transiently `fail_times` calls before succeeding,
/// for the retryable-tool-failure scenario (§8 scenario 6).
pub struct FlakyTool {
    remaining_failures: Mutex<u32>,
    output: Value,
}

impl FlakyTool {
    pub fn new(fail_times: u32, output: Value) -> Arc<Self> {
        Arc::new(Self {
            remaining_failures: Mutex::new(fail_times),
            output,
        })
    }
}

#[async_trait]
impl ToolHandler for FlakyTool {
    async fn call(&self, _inputs: Value, _ctx: &ToolContext) -> Result<Value, ToolInvocationError> {
        let mut remaining = self.remaining_failures.lock();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(ToolInvocationError::Transient {
                name: "flaky".to_string(),
                message: "temporary backend hiccup".to_string(),
            });
        }
        Ok(self.output.clone())
    }
}
