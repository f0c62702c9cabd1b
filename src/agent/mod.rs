//! Agents as data plus one runner (§4.6, §9): an `AgentSpec` differs only
//! in prompt, permitted tools, and model handle — never in code shape.

pub mod action;
pub mod runner;
pub mod spec;

pub use action::AgentAction;
pub use runner::{AgentRunner, AgentRunnerError, ModelBackend, run_turn_dyn};
pub use spec::{AgentSpec, ModelHandle, PeerSummary};
