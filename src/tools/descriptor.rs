//! `ToolDescriptor` (§3): registered once at startup, immutable thereafter.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffects {
    None,
    Read,
    Write,
    External,
}

/// Exponential backoff with jitter, bounded by a max attempt count (§4.4).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
        }
    }

    pub const fn none() -> Self {
        Self::new(1, 0, 0)
    }

    /// Delay before attempt number `attempt` (1-indexed), full jitter (§5).
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let exp = self.base_delay_ms.saturating_mul(1u64 << attempt.min(20));
        let capped = exp.min(self.max_delay_ms);
        let jittered = rand::random::<f64>() * capped as f64;
        std::time::Duration::from_millis(jittered as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 100, 2_000)
    }
}

/// Registered once at startup from the tools catalog (§6); immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub version: String,
    pub input_schema: serde_json::Value,
    pub output_schema: serde_json::Value,
    pub idempotent: bool,
    pub side_effects: SideEffects,
    pub timeout_ms: u64,
    pub retry_policy: RetryPolicy,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            input_schema: serde_json::json!({"type": "object"}),
            output_schema: serde_json::json!({"type": "object"}),
            idempotent: true,
            side_effects: SideEffects::Read,
            timeout_ms: 30_000,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_schemas(mut self, input: serde_json::Value, output: serde_json::Value) -> Self {
        self.input_schema = input;
        self.output_schema = output;
        self
    }

    pub fn with_side_effects(mut self, side_effects: SideEffects, idempotent: bool) -> Self {
        self.side_effects = side_effects;
        self.idempotent = idempotent;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }
}
