//! The orchestration engine (§4.7): one [`state::OrchestratorState`] machine
//! per session, driven by [`machine::Orchestrator`] through every other
//! component — Checkpointer, EventBus, MemoryStore, ToolRegistry,
//! ContextAssembler, AgentRunner.

pub mod error;
pub mod interrupts;
pub mod machine;
pub mod state;
pub mod workflows;

pub use error::OrchestratorError;
pub use interrupts::InterruptRegistry;
pub use machine::{
    Orchestrator, OrchestratorBuilder, OrchestratorConfig, QueryProvider, HUMAN_REVIEWER, INPUT_VALIDATOR,
    RESULT_SYNTHESIZER, TASK_PLANNER,
};
pub use state::OrchestratorState;
pub use workflows::{StepTemplate, WorkflowCatalog, WorkflowTemplate};
