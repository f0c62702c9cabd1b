//! # agentloom: session orchestration core for a multi-agent server
//!
//! `agentloom` is the hard part of a multi-agent server: the session-scoped
//! state machine that turns an inbound user message into a plan, drives that
//! plan through cooperating agents and tools, streams events to a transport,
//! suspends on human input, and resumes deterministically from a checkpoint
//! after a restart.
//!
//! ## Core Concepts
//!
//! - **Session / [`message`]**: append-only history of a single `(tenant_id,
//!   session_id)` conversation.
//! - **[`orchestrator`]**: the state machine (`Idle` → `Validating` →
//!   `Planning` → `Executing` → ... → `Terminal`) that drives a session.
//! - **[`context`]**: builds the bounded [`context::ContextBundle`] each
//!   agent sees for one invocation.
//! - **[`agent`]**: runs a single agent for one turn and returns a
//!   structured [`agent::AgentAction`].
//! - **[`tools`]**: the declarative tool catalog and dispatch layer.
//! - **[`memory_store`]**: three-tier memory (cache, runtime, vector).
//! - **[`checkpoint`]**: durable, versioned session snapshots.
//! - **[`event_bus`]**: typed pub/sub between the orchestrator and
//!   transport adapters.
//! - **[`protocol`]**: the wire event envelope and form schema.
//!
//! ## Quick Start
//!
//! ```
//! use agentloom::message::{Message, Role};
//! use agentloom::session::{PlanStep, StepStatus};
//!
//! let user_msg = Message::user_text("What is the capital of France?");
//! assert!(user_msg.has_role(Role::User));
//!
//! let step = PlanStep::new(0, "Answer the question", "responder");
//! assert_eq!(step.status, StepStatus::Pending);
//! ```
//!
//! ## Module Guide
//!
//! - [`message`] - Session history entries (tagged-union `Message`)
//! - [`session`] - Session, PlanStep, and session-level state
//! - [`event_bus`] - Typed pub/sub with bounded, drop-aware buffering
//! - [`checkpoint`] - Durable versioned snapshots (`(tenant, session, version)`)
//! - [`memory_store`] - Cache / Runtime / Vector memory tiers with ranking
//! - [`tools`] - Declarative tool catalog, validation, retry, cancellation
//! - [`context`] - Per-invocation `ContextBundle` assembly and trimming
//! - [`agent`] - Single-agent-turn execution and action schema
//! - [`orchestrator`] - The session state machine and transition discipline
//! - [`protocol`] - Wire event envelope and form schema
//! - [`config`] - Declarative catalogs (tools/workflows/permissions) loader
//! - [`error`] - Shared error-kind classification (§7)
//! - [`telemetry`] - Pretty-printing for error chains and diagnostics

pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod context;
pub mod error;
pub mod event_bus;
pub mod memory_store;
pub mod message;
pub mod orchestrator;
pub mod protocol;
pub mod session;
pub mod telemetry;
pub mod tools;
pub mod utils;
