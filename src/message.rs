//! Session history entries.
//!
//! The history is the single source of truth for a session (§3): every
//! user turn, agent action, tool invocation, and system note is appended
//! here as a [`Message`], and every outbound wire event (§6) is derived
//! from one. `Message` never needs to be mutated after it is appended —
//! only new messages are appended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who (or what) produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
    Tool,
    System,
}

/// A reference to an attachment uploaded alongside a user message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttachmentRef {
    pub kind: String,
    #[serde(rename = "ref")]
    pub reference: String,
}

/// The tagged-union payload carried by a [`Message`] (§3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageKind {
    UserText {
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<AttachmentRef>,
    },
    UserFormReply {
        form_id: String,
        values: serde_json::Value,
    },
    UserAttachmentRef {
        attachment: AttachmentRef,
    },
    AgentMarkdown {
        text: String,
    },
    AgentProgress {
        status: String,
    },
    AgentStep {
        step_index: u32,
        total_steps: u32,
        title: String,
    },
    AgentFormRequest {
        form_id: String,
        form: serde_json::Value,
    },
    AgentWorkflowFinish,
    ToolCall {
        invocation_id: String,
        tool_name: String,
        inputs: serde_json::Value,
    },
    ToolResult {
        invocation_id: String,
        tool_name: String,
        output: serde_json::Value,
    },
    SystemNote {
        text: String,
    },
}

/// One append-only entry in a session's history (§3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub role: Role,
    pub step_index: u32,
    pub kind: MessageKind,
}

impl Message {
    fn new(role: Role, step_index: u32, kind: MessageKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            role,
            step_index,
            kind,
        }
    }

    /// Convenience constructor for a plain inbound user turn.
    ///
    /// ```
    /// use agentloom::message::{Message, Role};
    ///
    /// let msg = Message::user_text("search recent orders for ACME");
    /// assert!(msg.has_role(Role::User));
    /// ```
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(
            Role::User,
            0,
            MessageKind::UserText {
                text: text.into(),
                attachments: Vec::new(),
            },
        )
    }

    pub fn user_text_with_attachments(
        text: impl Into<String>,
        attachments: Vec<AttachmentRef>,
    ) -> Self {
        Self::new(
            Role::User,
            0,
            MessageKind::UserText {
                text: text.into(),
                attachments,
            },
        )
    }

    pub fn user_form_reply(form_id: impl Into<String>, values: serde_json::Value) -> Self {
        Self::new(
            Role::User,
            0,
            MessageKind::UserFormReply {
                form_id: form_id.into(),
                values,
            },
        )
    }

    pub fn agent_markdown(step_index: u32, text: impl Into<String>) -> Self {
        Self::new(
            Role::Agent,
            step_index,
            MessageKind::AgentMarkdown { text: text.into() },
        )
    }

    pub fn agent_progress(step_index: u32, status: impl Into<String>) -> Self {
        Self::new(
            Role::Agent,
            step_index,
            MessageKind::AgentProgress {
                status: status.into(),
            },
        )
    }

    pub fn agent_step(step_index: u32, total_steps: u32, title: impl Into<String>) -> Self {
        Self::new(
            Role::Agent,
            step_index,
            MessageKind::AgentStep {
                step_index,
                total_steps,
                title: title.into(),
            },
        )
    }

    pub fn agent_form_request(
        step_index: u32,
        form_id: impl Into<String>,
        form: serde_json::Value,
    ) -> Self {
        Self::new(
            Role::Agent,
            step_index,
            MessageKind::AgentFormRequest {
                form_id: form_id.into(),
                form,
            },
        )
    }

    pub fn agent_workflow_finish(step_index: u32) -> Self {
        Self::new(Role::Agent, step_index, MessageKind::AgentWorkflowFinish)
    }

    pub fn tool_call(
        step_index: u32,
        invocation_id: impl Into<String>,
        tool_name: impl Into<String>,
        inputs: serde_json::Value,
    ) -> Self {
        Self::new(
            Role::Tool,
            step_index,
            MessageKind::ToolCall {
                invocation_id: invocation_id.into(),
                tool_name: tool_name.into(),
                inputs,
            },
        )
    }

    pub fn tool_result(
        step_index: u32,
        invocation_id: impl Into<String>,
        tool_name: impl Into<String>,
        output: serde_json::Value,
    ) -> Self {
        Self::new(
            Role::Tool,
            step_index,
            MessageKind::ToolResult {
                invocation_id: invocation_id.into(),
                tool_name: tool_name.into(),
                output,
            },
        )
    }

    pub fn system_note(step_index: u32, text: impl Into<String>) -> Self {
        Self::new(
            Role::System,
            step_index,
            MessageKind::SystemNote { text: text.into() },
        )
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.role == role
    }

    /// True for `tool_call`/`tool_result` pairs and `agent_form_request`,
    /// which the context assembler must always retain (§4.5).
    pub fn is_pinned_by_default(&self) -> bool {
        matches!(
            self.kind,
            MessageKind::AgentFormRequest { .. }
                | MessageKind::UserFormReply { .. }
                | MessageKind::ToolCall { .. }
                | MessageKind::ToolResult { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_text_has_user_role() {
        let msg = Message::user_text("hello");
        assert!(msg.has_role(Role::User));
        assert!(!msg.has_role(Role::Agent));
    }

    #[test]
    fn form_round_trips_are_pinned() {
        let req = Message::agent_form_request(1, "F1", serde_json::json!({"id": "F1"}));
        let reply = Message::user_form_reply("F1", serde_json::json!({"supplier": "S1"}));
        assert!(req.is_pinned_by_default());
        assert!(reply.is_pinned_by_default());
        assert!(!Message::agent_progress(1, "thinking...").is_pinned_by_default());
    }

    #[test]
    fn serde_round_trip_preserves_kind() {
        let msg = Message::tool_call(2, "inv-1", "order_search", serde_json::json!({"q": "ACME"}));
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }
}
