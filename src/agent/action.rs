//! The seven actions an `AgentRunner` invocation may produce (§4.6). The
//! model is constrained to one schema per turn; malformed output is a
//! retry-then-permanent-error case handled by the runner, not here.

use serde::{Deserialize, Serialize};

use crate::protocol::FormSpec;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AgentAction {
    EmitMarkdown { text: String },
    EmitProgress { status: String },
    CallTool { name: String, inputs: serde_json::Value },
    RequestForm { form_spec: FormSpec },
    Delegate { agent_name: String, inputs: serde_json::Value },
    FinishStep { output: serde_json::Value },
    FailStep { reason: String },
}

impl AgentAction {
    pub fn is_terminal_for_step(&self) -> bool {
        matches!(self, AgentAction::FinishStep { .. } | AgentAction::FailStep { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape_uses_snake_case_tag() {
        let action = AgentAction::EmitMarkdown {
            text: "hi".to_string(),
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["action"], "emit_markdown");
        assert_eq!(json["text"], "hi");
    }

    #[test]
    fn finish_and_fail_are_terminal_for_the_step() {
        assert!(AgentAction::FinishStep {
            output: serde_json::Value::Null
        }
        .is_terminal_for_step());
        assert!(AgentAction::FailStep {
            reason: "oops".into()
        }
        .is_terminal_for_step());
        assert!(!AgentAction::EmitProgress {
            status: "...".into()
        }
        .is_terminal_for_step());
    }
}
