//! Agents as data (§9): an `AgentSpec` is a prompt, a tool policy, and a
//! model handle. There is no per-agent-kind code — one `AgentRunner`
//! interprets every spec.

use serde::{Deserialize, Serialize};

/// Declarative description of one agent in the roster (§4.6, §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    pub system_prompt: String,
    /// Tool names this agent is permitted to call; enforced by the
    /// ToolRegistry's policy filter (§4.4), not trusted from model output.
    pub permitted_tools: Vec<String>,
    /// One-line description surfaced to peers that may delegate to this
    /// agent (§4.5 step 4) — no further detail is exposed transitively.
    pub description: String,
    pub model_handle: ModelHandle,
}

impl AgentSpec {
    pub fn new(
        name: impl Into<String>,
        system_prompt: impl Into<String>,
        model_handle: ModelHandle,
    ) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            permitted_tools: Vec::new(),
            description: String::new(),
            model_handle,
        }
    }

    pub fn with_tools(mut self, tools: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.permitted_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn permits_tool(&self, tool_name: &str) -> bool {
        self.permitted_tools.iter().any(|t| t == tool_name)
    }
}

/// A named reference to a model, resolved at invocation time so a session
/// can upgrade models mid-flight without rebuilding its `AgentSpec` (§4.6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelHandle {
    pub provider: String,
    pub model: String,
}

impl ModelHandle {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

/// A minimal, human-readable roster entry shared with peers a target agent
/// may delegate to (§4.5 step 4) — name and description only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerSummary {
    pub name: String,
    pub description: String,
}

impl From<&AgentSpec> for PeerSummary {
    fn from(spec: &AgentSpec) -> Self {
        Self {
            name: spec.name.clone(),
            description: spec.description.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permits_tool_checks_membership() {
        let spec = AgentSpec::new("planner", "plan carefully", ModelHandle::new("openai", "gpt"))
            .with_tools(["order_search"]);
        assert!(spec.permits_tool("order_search"));
        assert!(!spec.permits_tool("create_po"));
    }
}
