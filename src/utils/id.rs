//! ID generation for invocations, tool calls, and forms.

use uuid::Uuid;

pub fn new_invocation_id() -> String {
    format!("inv_{}", Uuid::new_v4())
}

pub fn new_tool_call_id() -> String {
    format!("tc_{}", Uuid::new_v4())
}

pub fn new_form_id() -> String {
    format!("form_{}", Uuid::new_v4())
}
