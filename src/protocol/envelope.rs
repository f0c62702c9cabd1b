//! The event envelope (§6): every message in both directions is an object
//! with a top-level `type` field. Outbound and inbound directions get
//! separate Rust types because the variants each side can produce differ.

use serde::{Deserialize, Serialize};

use super::form::{FormSpec, SelectOption};
use crate::message::AttachmentRef;

/// Sentinel `status` value marking plan completion inside a `progress`
/// component (§9 Open Question (a): adopted as a sentinel, not a distinct
/// event type, for wire compatibility).
pub const WORKFLOW_FINISH_STATUS: &str = "_workflow_finish";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressData {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_steps: Option<u32>,
}

impl ProgressData {
    pub fn workflow_finish() -> Self {
        Self {
            status: WORKFLOW_FINISH_STATUS.to_string(),
            step_index: None,
            total_steps: None,
        }
    }

    pub fn is_workflow_finish(&self) -> bool {
        self.status == WORKFLOW_FINISH_STATUS
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged, rename_all = "camelCase")]
pub enum UiInteractionData {
    FormRequest {
        form: FormSpec,
    },
    QueryResult {
        form_id: String,
        field_key: String,
        results: Vec<SelectOption>,
        has_more: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "component", content = "data", rename_all = "snake_case")]
pub enum ComponentEvent {
    Progress(ProgressData),
    UiInteraction(UiInteractionData),
}

/// An event the orchestrator publishes to the transport (§6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum OutboundEvent {
    Markdown(String),
    Component(ComponentEvent),
}

impl OutboundEvent {
    pub fn markdown(text: impl Into<String>) -> Self {
        OutboundEvent::Markdown(text.into())
    }

    pub fn progress(status: impl Into<String>, step_index: Option<u32>, total_steps: Option<u32>) -> Self {
        OutboundEvent::Component(ComponentEvent::Progress(ProgressData {
            status: status.into(),
            step_index,
            total_steps,
        }))
    }

    pub fn workflow_finish() -> Self {
        OutboundEvent::Component(ComponentEvent::Progress(ProgressData::workflow_finish()))
    }

    pub fn form_request(form: FormSpec) -> Self {
        OutboundEvent::Component(ComponentEvent::UiInteraction(
            UiInteractionData::FormRequest { form },
        ))
    }

    pub fn query_result(
        form_id: impl Into<String>,
        field_key: impl Into<String>,
        results: Vec<SelectOption>,
        has_more: bool,
    ) -> Self {
        OutboundEvent::Component(ComponentEvent::UiInteraction(
            UiInteractionData::QueryResult {
                form_id: form_id.into(),
                field_key: field_key.into(),
                results,
                has_more,
            },
        ))
    }

    /// True for `markdown`, `form_request`, and the `_workflow_finish`
    /// sentinel — the EventBus must never drop these on overflow (§4.1, §8).
    pub fn is_protected(&self) -> bool {
        match self {
            OutboundEvent::Markdown(_) => true,
            OutboundEvent::Component(ComponentEvent::Progress(p)) => p.is_workflow_finish(),
            OutboundEvent::Component(ComponentEvent::UiInteraction(
                UiInteractionData::FormRequest { .. },
            )) => true,
            OutboundEvent::Component(ComponentEvent::UiInteraction(
                UiInteractionData::QueryResult { .. },
            )) => true,
            OutboundEvent::Component(ComponentEvent::Progress(_)) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Cancel,
    Close,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserMessageData {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlData {
    pub action: ControlAction,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum InboundUiInteraction {
    FormReply {
        form: InboundFormReply,
    },
    Query {
        query: InboundQuery,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InboundFormReply {
    pub id: String,
    pub values: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InboundQuery {
    pub form_id: String,
    pub field_key: String,
    pub term: String,
    pub page: u32,
}

/// An event the orchestrator accepts from the transport (§6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum InboundEvent {
    UserMessage(UserMessageData),
    Component(InboundUiInteraction),
    Control(ControlData),
}
