//! The `Orchestrator` (§4.7): one state machine per active session,
//! coordinating every other component through the transition discipline —
//! append history, update `plan`/`state`, checkpoint, then publish.

use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tracing::instrument;

use crate::agent::{AgentAction, AgentSpec, ModelBackend, run_turn_dyn};
use crate::checkpoint::{Checkpoint, Checkpointer};
use crate::context::ContextAssembler;
use crate::event_bus::EventBus;
use crate::memory_store::MemoryStore;
use crate::message::{Message, MessageKind};
use crate::protocol::envelope::{ControlAction, InboundQuery, InboundUiInteraction, UserMessageData};
use crate::protocol::{FormSpec, InboundEvent, OutboundEvent, SelectOption};
use crate::session::{PendingInterrupt, PlanStep, Session, SessionKey, StepStatus};
use crate::tools::{ToolPolicy, ToolRegistry};
use crate::utils::CancelToken;
use crate::utils::id::new_invocation_id;

use super::error::OrchestratorError;
use super::interrupts::InterruptRegistry;
use super::state::OrchestratorState;
use super::workflows::{WorkflowCatalog, WorkflowTemplate};

/// Reserved agent names the state machine dispatches to by convention
/// (§4.7). `HUMAN_REVIEWER` is the only one that is genuinely optional —
/// without it, `Recovering` falls back to the bounded retry/skip policy.
pub const INPUT_VALIDATOR: &str = "input_validator";
pub const TASK_PLANNER: &str = "task_planner";
pub const RESULT_SYNTHESIZER: &str = "result_synthesizer";
pub const HUMAN_REVIEWER: &str = "human_reviewer";

/// Upper bound on turns consumed by one PlanStep before it is treated as a
/// failure — a runaway-agent backstop, not a spec'd limit.
const MAX_TURNS_PER_STEP: u32 = 50;

type Result<T> = std::result::Result<T, OrchestratorError>;

/// Answers an async `select` field's data-source query (§6 form schema).
/// No built-in providers ship with this crate, matching the ToolHandler
/// convention — callers register their own per `data_source.provider` name.
#[async_trait]
pub trait QueryProvider: Send + Sync {
    async fn query(&self, query: &InboundQuery) -> (Vec<SelectOption>, bool);
}

/// How `Recovering` resolves a failed PlanStep when no `human_reviewer` is
/// registered (§4.7, §7): retry up to `max_step_retries`, then skip the
/// step (if `allow_skip`) or abort the whole plan.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_step_retries: u32,
    pub allow_skip: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_step_retries: 1,
            allow_skip: true,
        }
    }
}

/// Builds an [`Orchestrator`] from its required collaborators plus an
/// agent roster, workflow catalog, and per-tenant tool policies.
pub struct OrchestratorBuilder {
    checkpointer: Arc<dyn Checkpointer>,
    event_bus: Arc<EventBus>,
    memory: Arc<MemoryStore>,
    tools: Arc<ToolRegistry>,
    context_assembler: ContextAssembler,
    agents: FxHashMap<String, AgentSpec>,
    backends: FxHashMap<String, Arc<dyn ModelBackend>>,
    workflows: Vec<WorkflowTemplate>,
    tenant_policies: FxHashMap<String, ToolPolicy>,
    query_providers: FxHashMap<String, Arc<dyn QueryProvider>>,
    config: OrchestratorConfig,
}

impl OrchestratorBuilder {
    pub fn new(
        checkpointer: Arc<dyn Checkpointer>,
        event_bus: Arc<EventBus>,
        memory: Arc<MemoryStore>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            checkpointer,
            event_bus,
            memory,
            tools,
            context_assembler: ContextAssembler::default(),
            agents: FxHashMap::default(),
            backends: FxHashMap::default(),
            workflows: Vec::new(),
            tenant_policies: FxHashMap::default(),
            query_providers: FxHashMap::default(),
            config: OrchestratorConfig::default(),
        }
    }

    #[must_use]
    pub fn with_agent(mut self, spec: AgentSpec, backend: Arc<dyn ModelBackend>) -> Self {
        self.backends.insert(spec.name.clone(), backend);
        self.agents.insert(spec.name.clone(), spec);
        self
    }

    #[must_use]
    pub fn with_workflow(mut self, workflow: WorkflowTemplate) -> Self {
        self.workflows.push(workflow);
        self
    }

    #[must_use]
    pub fn with_tenant_policy(mut self, tenant_id: impl Into<String>, policy: ToolPolicy) -> Self {
        self.tenant_policies.insert(tenant_id.into(), policy);
        self
    }

    #[must_use]
    pub fn with_query_provider(mut self, name: impl Into<String>, provider: Arc<dyn QueryProvider>) -> Self {
        self.query_providers.insert(name.into(), provider);
        self
    }

    #[must_use]
    pub fn with_context_assembler(mut self, assembler: ContextAssembler) -> Self {
        self.context_assembler = assembler;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Orchestrator {
        Orchestrator {
            checkpointer: self.checkpointer,
            event_bus: self.event_bus,
            memory: self.memory,
            tools: self.tools,
            context_assembler: self.context_assembler,
            agents: self.agents,
            backends: self.backends,
            workflows: WorkflowCatalog::new(self.workflows),
            tenant_policies: self.tenant_policies,
            query_providers: self.query_providers,
            config: self.config,
            interrupts: InterruptRegistry::new(),
            sessions: parking_lot::Mutex::new(FxHashMap::default()),
        }
    }
}

/// Owns one state machine per active `(tenant_id, session_id)` (§4.7, §5).
/// Every mutation of a `Session` happens with that session's `tokio::Mutex`
/// held, giving the single-writer guarantee §5 requires without blocking
/// unrelated sessions.
pub struct Orchestrator {
    checkpointer: Arc<dyn Checkpointer>,
    event_bus: Arc<EventBus>,
    memory: Arc<MemoryStore>,
    tools: Arc<ToolRegistry>,
    context_assembler: ContextAssembler,
    agents: FxHashMap<String, AgentSpec>,
    backends: FxHashMap<String, Arc<dyn ModelBackend>>,
    workflows: WorkflowCatalog,
    tenant_policies: FxHashMap<String, ToolPolicy>,
    query_providers: FxHashMap<String, Arc<dyn QueryProvider>>,
    config: OrchestratorConfig,
    interrupts: InterruptRegistry,
    sessions: parking_lot::Mutex<FxHashMap<SessionKey, Arc<tokio::sync::Mutex<Session>>>>,
}

impl Orchestrator {
    pub fn builder(
        checkpointer: Arc<dyn Checkpointer>,
        event_bus: Arc<EventBus>,
        memory: Arc<MemoryStore>,
        tools: Arc<ToolRegistry>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder::new(checkpointer, event_bus, memory, tools)
    }

    /// Top-level dispatch for an inbound wire event (§6).
    #[instrument(skip(self, event), fields(session = %key), err)]
    pub async fn handle_inbound(&self, key: &SessionKey, event: InboundEvent) -> Result<()> {
        match event {
            InboundEvent::UserMessage(data) => self.handle_user_message(key, data).await,
            InboundEvent::Component(InboundUiInteraction::FormReply { form }) => {
                self.handle_form_reply(key, &form.id, form.values).await
            }
            InboundEvent::Component(InboundUiInteraction::Query { query }) => self.handle_query(key, query).await,
            InboundEvent::Control(data) => self.handle_control(key, data.action).await,
        }
    }

    async fn handle_user_message(&self, key: &SessionKey, data: UserMessageData) -> Result<()> {
        let lock = self.get_or_load_session(key).await?;
        let mut session = lock.lock().await;
        match session.state {
            OrchestratorState::Idle | OrchestratorState::Terminal => {}
            ref other => {
                return Err(OrchestratorError::Internal(format!(
                    "session {key} cannot accept a new message while in state {other:?}"
                )));
            }
        }
        session.plan.clear();
        session.step_index = 0;
        self.interrupts.reset_session(key);

        let user_msg = Message::user_text_with_attachments(data.text, data.attachments);
        let progress_msg = Message::agent_progress(0, "Analyzing your request...");
        let next_state = if self.agents.contains_key(INPUT_VALIDATOR) {
            OrchestratorState::Validating
        } else {
            OrchestratorState::Planning
        };
        self.apply_transition(&mut session, vec![user_msg, progress_msg], next_state)
            .await?;
        self.drive(&mut session, key.clone()).await
    }

    async fn handle_form_reply(&self, key: &SessionKey, form_id: &str, values: serde_json::Value) -> Result<()> {
        let lock = self.get_or_load_session(key).await?;
        let mut session = lock.lock().await;
        let index = match &session.state {
            OrchestratorState::AwaitingHuman(index, expected) if expected == form_id => *index,
            _ => return Err(OrchestratorError::FormReplyMismatch(form_id.to_string())),
        };
        match &session.pending_interrupt {
            Some(p) if p.form_id == form_id => {}
            _ => return Err(OrchestratorError::FormReplyMismatch(form_id.to_string())),
        }
        session.pending_interrupt = None;
        let reply = Message::user_form_reply(form_id, values);
        self.apply_transition(&mut session, vec![reply], OrchestratorState::Executing(index))
            .await?;
        self.drive(&mut session, key.clone()).await
    }

    async fn handle_query(&self, key: &SessionKey, query: InboundQuery) -> Result<()> {
        let lock = self.get_or_load_session(key).await?;
        let session = lock.lock().await;
        let form_value = session
            .pending_interrupt
            .as_ref()
            .filter(|p| p.form_id == query.form_id)
            .map(|p| p.form.clone())
            .ok_or_else(|| OrchestratorError::FormReplyMismatch(query.form_id.clone()))?;
        drop(session);

        let form: FormSpec =
            serde_json::from_value(form_value).map_err(|e| OrchestratorError::Internal(e.to_string()))?;
        let field = form
            .fields
            .iter()
            .find(|f| f.key == query.field_key)
            .ok_or_else(|| OrchestratorError::Internal(format!("unknown field `{}`", query.field_key)))?;
        let provider_name = field
            .data_source
            .as_ref()
            .map(|d| d.provider.clone())
            .ok_or_else(|| OrchestratorError::Internal(format!("field `{}` has no data source", query.field_key)))?;

        let (results, has_more) = match self.query_providers.get(&provider_name) {
            Some(provider) => provider.query(&query).await,
            None => (Vec::new(), false),
        };
        self.event_bus
            .publish(key, OutboundEvent::query_result(query.form_id, query.field_key, results, has_more))
            .await;
        Ok(())
    }

    async fn handle_control(&self, key: &SessionKey, action: ControlAction) -> Result<()> {
        match action {
            ControlAction::Cancel => self.cancel(key).await,
            ControlAction::Close => self.close(key).await,
        }
    }

    /// Cancel is idempotent (§4.7, §8): a session already `Idle`, or one
    /// that never existed, is a no-op.
    pub async fn cancel(&self, key: &SessionKey) -> Result<()> {
        self.interrupts.cancel_session(key);
        let Some(lock) = self.sessions.lock().get(key).cloned() else {
            return Ok(());
        };
        let mut session = lock.lock().await;
        if state_is_running(&session.state) {
            self.apply_cancel(&mut session).await?;
        }
        self.interrupts.reset_session(key);
        Ok(())
    }

    pub async fn close(&self, key: &SessionKey) -> Result<()> {
        self.interrupts.cancel_session(key);
        self.sessions.lock().remove(key);
        self.interrupts.remove_session(key);
        self.event_bus.close(key);
        Ok(())
    }

    /// Reentry after restart (§4.7): if the session is suspended on a form,
    /// re-emit it (idempotent replay); if `Idle`/`Terminal`, nothing to do;
    /// otherwise re-enter the state machine and re-invoke agents/tools.
    pub async fn reattach(&self, key: &SessionKey) -> Result<()> {
        let lock = self.get_or_load_session(key).await?;
        let mut session = lock.lock().await;
        match session.state.clone() {
            OrchestratorState::AwaitingHuman(_, form_id) => {
                if let Some(pending) = session.pending_interrupt.clone() {
                    if pending.form_id == form_id {
                        let form: FormSpec = serde_json::from_value(pending.form)
                            .map_err(|e| OrchestratorError::Internal(e.to_string()))?;
                        self.event_bus.publish(key, OutboundEvent::form_request(form)).await;
                    }
                }
                Ok(())
            }
            OrchestratorState::Idle | OrchestratorState::Terminal => Ok(()),
            _ => self.drive(&mut session, key.clone()).await,
        }
    }

    async fn get_or_load_session(&self, key: &SessionKey) -> Result<Arc<tokio::sync::Mutex<Session>>> {
        if let Some(existing) = self.sessions.lock().get(key).cloned() {
            return Ok(existing);
        }
        let loaded = self.checkpointer.load_latest(&key.tenant_id, &key.session_id).await?;
        let session = match loaded {
            Some(checkpoint) => checkpoint.into_session(),
            None => Session::fresh(key.clone()),
        };
        let arc = Arc::new(tokio::sync::Mutex::new(session));
        let mut sessions = self.sessions.lock();
        Ok(sessions.entry(key.clone()).or_insert(arc).clone())
    }

    fn tool_policy_for(&self, tenant_id: &str) -> ToolPolicy {
        self.tenant_policies.get(tenant_id).cloned().unwrap_or_else(ToolPolicy::allow_all)
    }

    /// The transition discipline (§4.7): append, update state, checkpoint,
    /// *then* publish. Nothing is observed "live" before it is durable.
    async fn apply_transition(
        &self,
        session: &mut Session,
        messages: Vec<Message>,
        new_state: OrchestratorState,
    ) -> Result<()> {
        for m in &messages {
            session.append(m.clone());
        }
        session.state = new_state;
        let checkpoint = Checkpoint::from_session(session);
        self.checkpointer.save(checkpoint).await?;
        for m in &messages {
            if let Some(event) = derive_outbound_event(m) {
                self.event_bus.publish(&session.key, event).await;
            }
        }
        Ok(())
    }

    async fn apply_cancel(&self, session: &mut Session) -> Result<()> {
        session.pending_interrupt = None;
        let step = session.state.executing_step().unwrap_or(session.step_index);
        let msg = Message::agent_markdown(step, "Cancelled.");
        self.apply_transition(session, vec![msg], OrchestratorState::Idle).await
    }

    /// Runs the state machine until it reaches a suspend point
    /// (`Idle`, `AwaitingHuman`, `Terminal`) or an explicit cancel lands.
    async fn drive(&self, session: &mut Session, key: SessionKey) -> Result<()> {
        let cancel = self.interrupts.session_token(&key);
        loop {
            if cancel.is_cancelled() && state_is_running(&session.state) {
                return self.apply_cancel(session).await;
            }
            match session.state.clone() {
                OrchestratorState::Idle | OrchestratorState::Terminal | OrchestratorState::AwaitingHuman(..) => {
                    return Ok(());
                }
                OrchestratorState::Validating => self.step_validating(session, cancel.child()).await?,
                OrchestratorState::Planning => self.step_planning(session, cancel.child()).await?,
                OrchestratorState::Executing(index) => self.step_executing(session, index, cancel.child()).await?,
                OrchestratorState::Recovering => self.step_recovering(session, cancel.child()).await?,
                OrchestratorState::Synthesizing => self.step_synthesizing(session, cancel.child()).await?,
            }
        }
    }

    async fn run_agent(
        &self,
        session: &Session,
        agent_name: &str,
        step: PlanStep,
        cancel: CancelToken,
    ) -> Result<AgentAction> {
        let spec = self
            .agents
            .get(agent_name)
            .ok_or_else(|| OrchestratorError::UnknownAgent(agent_name.to_string()))?;
        let backend = self
            .backends
            .get(agent_name)
            .ok_or_else(|| OrchestratorError::UnknownAgent(agent_name.to_string()))?;
        let roster: Vec<AgentSpec> = self.agents.values().cloned().collect();
        let policy = self.tool_policy_for(&session.key.tenant_id);
        let context =
            self.context_assembler
                .assemble_with_step(session, step, spec, &roster, &self.memory, &self.tools, &policy);
        Ok(run_turn_dyn(backend.as_ref(), spec, &context, cancel).await?)
    }

    async fn step_validating(&self, session: &mut Session, cancel: CancelToken) -> Result<()> {
        if !self.agents.contains_key(INPUT_VALIDATOR) {
            return self.apply_transition(session, vec![], OrchestratorState::Planning).await;
        }
        let bootstrap = PlanStep::new(0, "Validate request", INPUT_VALIDATOR);
        let action = self.run_agent(session, INPUT_VALIDATOR, bootstrap, cancel).await?;
        match action {
            AgentAction::FailStep { reason } => {
                let msg = Message::agent_markdown(0, reason);
                self.apply_transition(session, vec![msg], OrchestratorState::Idle).await
            }
            _ => self.apply_transition(session, vec![], OrchestratorState::Planning).await,
        }
    }

    async fn step_planning(&self, session: &mut Session, cancel: CancelToken) -> Result<()> {
        let bootstrap = PlanStep::new(0, "Draft a plan", TASK_PLANNER);
        let action = self.run_agent(session, TASK_PLANNER, bootstrap, cancel).await?;
        match action {
            AgentAction::FinishStep { output } => {
                let steps = self.instantiate_plan(&output)?;
                if steps.is_empty() {
                    return Err(OrchestratorError::Internal("planner produced an empty plan".into()));
                }
                session.plan = steps;
                self.apply_transition(session, vec![], OrchestratorState::Executing(0)).await
            }
            AgentAction::FailStep { reason } => {
                let msg = Message::agent_markdown(0, reason);
                self.apply_transition(session, vec![msg], OrchestratorState::Idle).await
            }
            other => Err(OrchestratorError::Internal(format!(
                "task_planner produced an unexpected action: {other:?}"
            ))),
        }
    }

    fn instantiate_plan(&self, output: &serde_json::Value) -> Result<Vec<PlanStep>> {
        if let Some(name) = output.get("workflow").and_then(|v| v.as_str()) {
            return self
                .workflows
                .instantiate(name)
                .ok_or_else(|| OrchestratorError::UnknownWorkflow(name.to_string()));
        }
        if let Some(steps) = output.get("steps").and_then(|v| v.as_array()) {
            return Ok(steps
                .iter()
                .enumerate()
                .map(|(i, s)| {
                    PlanStep::new(
                        i as u32,
                        s.get("title").and_then(|v| v.as_str()).unwrap_or("Step").to_string(),
                        s.get("agent_name").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                    )
                })
                .collect());
        }
        Err(OrchestratorError::Internal(
            "planner output carried neither `workflow` nor `steps`".into(),
        ))
    }

    async fn step_executing(&self, session: &mut Session, index: u32, cancel: CancelToken) -> Result<()> {
        let needs_step_event = {
            let step = session
                .plan
                .iter_mut()
                .find(|s| s.index == index)
                .ok_or_else(|| OrchestratorError::Internal(format!("no such plan step {index}")))?;
            if step.status == StepStatus::Pending {
                step.status = StepStatus::Running;
                true
            } else {
                false
            }
        };
        if needs_step_event {
            let total = session.plan.len() as u32;
            let title = session.plan.iter().find(|s| s.index == index).unwrap().title.clone();
            let msg = Message::agent_step(index, total, title);
            self.apply_transition(session, vec![msg], OrchestratorState::Executing(index)).await?;
        }

        for _turn in 0..MAX_TURNS_PER_STEP {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let step = session
                .plan
                .iter()
                .find(|s| s.index == index)
                .cloned()
                .ok_or_else(|| OrchestratorError::Internal(format!("no such plan step {index}")))?;
            let agent_name = step.agent_name.clone();
            let action = self.run_agent(session, &agent_name, step, cancel.child()).await?;

            match action {
                AgentAction::EmitMarkdown { text } => {
                    let msg = Message::agent_markdown(index, text);
                    self.apply_transition(session, vec![msg], OrchestratorState::Executing(index)).await?;
                }
                AgentAction::EmitProgress { status } => {
                    let msg = Message::agent_progress(index, status);
                    self.apply_transition(session, vec![msg], OrchestratorState::Executing(index)).await?;
                }
                AgentAction::CallTool { name, inputs } => {
                    self.run_tool_call(session, index, &name, inputs, cancel.child()).await?;
                    if session.state != OrchestratorState::Executing(index) {
                        // the tool call failed and moved this session into Recovering
                        return Ok(());
                    }
                }
                AgentAction::RequestForm { form_spec } => {
                    let form_id = form_spec.id.clone();
                    let form_value =
                        serde_json::to_value(&form_spec).map_err(|e| OrchestratorError::Internal(e.to_string()))?;
                    session.pending_interrupt = Some(PendingInterrupt {
                        step_index: index,
                        form_id: form_id.clone(),
                        form: form_value.clone(),
                    });
                    let msg = Message::agent_form_request(index, form_id.clone(), form_value);
                    self.apply_transition(session, vec![msg], OrchestratorState::AwaitingHuman(index, form_id))
                        .await?;
                    return Ok(());
                }
                AgentAction::Delegate { agent_name, inputs } => {
                    if let Some(step_mut) = session.plan.iter_mut().find(|s| s.index == index) {
                        step_mut.rebind_agent(agent_name);
                        step_mut.inputs = inputs;
                    }
                }
                AgentAction::FinishStep { output } => {
                    if let Some(step_mut) = session.plan.iter_mut().find(|s| s.index == index) {
                        step_mut.status = StepStatus::Done;
                        step_mut.output_ref = Some(output.to_string());
                    }
                    session.step_index = session.plan.iter().filter(|s| s.status.is_terminal()).count() as u32;
                    let next_index = session.plan.iter().map(|s| s.index).filter(|i| *i > index).min();
                    match next_index {
                        Some(next) => {
                            self.apply_transition(session, vec![], OrchestratorState::Executing(next)).await?;
                        }
                        None if self.agents.contains_key(RESULT_SYNTHESIZER) => {
                            self.apply_transition(session, vec![], OrchestratorState::Synthesizing).await?;
                        }
                        None => {
                            let finish = Message::agent_workflow_finish(index);
                            self.apply_transition(session, vec![finish], OrchestratorState::Terminal).await?;
                        }
                    }
                    return Ok(());
                }
                AgentAction::FailStep { reason } => {
                    if let Some(step_mut) = session.plan.iter_mut().find(|s| s.index == index) {
                        step_mut.status = StepStatus::Failed;
                    }
                    let msg = Message::system_note(index, format!("step_failed: {reason}"));
                    self.apply_transition(session, vec![msg], OrchestratorState::Recovering).await?;
                    return Ok(());
                }
            }
        }

        if let Some(step_mut) = session.plan.iter_mut().find(|s| s.index == index) {
            step_mut.status = StepStatus::Failed;
        }
        let msg = Message::system_note(index, "step_failed: exceeded maximum turn count".to_string());
        self.apply_transition(session, vec![msg], OrchestratorState::Recovering).await
    }

    async fn run_tool_call(
        &self,
        session: &mut Session,
        index: u32,
        name: &str,
        inputs: serde_json::Value,
        cancel: CancelToken,
    ) -> Result<()> {
        let policy = self.tool_policy_for(&session.key.tenant_id);
        let agent_name = session
            .plan
            .iter()
            .find(|s| s.index == index)
            .map(|s| s.agent_name.clone())
            .unwrap_or_default();
        let unrestricted = self.agents.get(&agent_name).is_some_and(|a| a.permitted_tools.is_empty());
        let invocation_id = new_invocation_id();
        let call_msg = Message::tool_call(index, invocation_id.clone(), name, inputs.clone());

        let session_key = session.key.clone();
        let result = self
            .tools
            .invoke(name, inputs, &session_key, &invocation_id, cancel, &policy, unrestricted)
            .await;
        match result {
            Ok(output) => {
                let result_msg = Message::tool_result(index, invocation_id, name, output);
                self.apply_transition(session, vec![call_msg, result_msg], OrchestratorState::Executing(index))
                    .await
            }
            Err(err) => {
                let result_msg =
                    Message::tool_result(index, invocation_id, name, serde_json::json!({"error": err.to_string()}));
                if let Some(step_mut) = session.plan.iter_mut().find(|s| s.index == index) {
                    step_mut.status = StepStatus::Failed;
                }
                let fail_note = Message::system_note(index, format!("step_failed: tool `{name}` error: {err}"));
                self.apply_transition(
                    session,
                    vec![call_msg, result_msg, fail_note],
                    OrchestratorState::Recovering,
                )
                .await
            }
        }
    }

    async fn step_recovering(&self, session: &mut Session, cancel: CancelToken) -> Result<()> {
        let index = session
            .plan
            .iter()
            .find(|s| s.status == StepStatus::Failed)
            .map(|s| s.index)
            .ok_or_else(|| OrchestratorError::Internal("recovering with no failed step".into()))?;
        let attempts = session
            .history
            .iter()
            .filter(|m| m.step_index == index)
            .filter(|m| matches!(&m.kind, MessageKind::SystemNote { text } if text.starts_with("step_failed")))
            .count() as u32;

        let decision = if self.agents.contains_key(HUMAN_REVIEWER) {
            let step = session.plan.iter().find(|s| s.index == index).cloned().unwrap();
            match self.run_agent(session, HUMAN_REVIEWER, step, cancel).await? {
                AgentAction::FinishStep { output } => output
                    .get("decision")
                    .and_then(|v| v.as_str())
                    .unwrap_or("skip")
                    .to_string(),
                AgentAction::FailStep { .. } => "abort".to_string(),
                _ => "skip".to_string(),
            }
        } else if attempts <= self.config.max_step_retries {
            "retry".to_string()
        } else if self.config.allow_skip {
            "skip".to_string()
        } else {
            "abort".to_string()
        };

        match decision.as_str() {
            "retry" => {
                if let Some(step_mut) = session.plan.iter_mut().find(|s| s.index == index) {
                    step_mut.status = StepStatus::Pending;
                }
                let note = Message::system_note(index, format!("retrying step (attempt {})", attempts + 1));
                self.apply_transition(session, vec![note], OrchestratorState::Executing(index)).await
            }
            "abort" => {
                for step_mut in session.plan.iter_mut() {
                    if !step_mut.status.is_terminal() {
                        step_mut.status = StepStatus::Skipped;
                    }
                }
                let msg = Message::agent_markdown(index, "The request could not be completed and has been aborted.");
                let finish = Message::agent_workflow_finish(index);
                self.apply_transition(session, vec![msg, finish], OrchestratorState::Terminal).await
            }
            _ => {
                if let Some(step_mut) = session.plan.iter_mut().find(|s| s.index == index) {
                    step_mut.status = StepStatus::Skipped;
                }
                let next_index = session.plan.iter().map(|s| s.index).filter(|i| *i > index).min();
                let msg = Message::agent_markdown(index, "Skipping a step that could not be completed.");
                match next_index {
                    Some(next) => self.apply_transition(session, vec![msg], OrchestratorState::Executing(next)).await,
                    None if self.agents.contains_key(RESULT_SYNTHESIZER) => {
                        self.apply_transition(session, vec![msg], OrchestratorState::Synthesizing).await
                    }
                    None => {
                        let finish = Message::agent_workflow_finish(index);
                        self.apply_transition(session, vec![msg, finish], OrchestratorState::Terminal).await
                    }
                }
            }
        }
    }

    async fn step_synthesizing(&self, session: &mut Session, cancel: CancelToken) -> Result<()> {
        let last_index = session.plan.iter().map(|s| s.index).max().unwrap_or(0);
        let bootstrap = PlanStep::new(last_index + 1, "Synthesize results", RESULT_SYNTHESIZER);
        let action = self.run_agent(session, RESULT_SYNTHESIZER, bootstrap, cancel).await?;
        let text = match action {
            AgentAction::FinishStep { output } => output
                .get("text")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| output.to_string()),
            AgentAction::EmitMarkdown { text } => text,
            _ => "Done.".to_string(),
        };
        let markdown = Message::agent_markdown(last_index, text);
        let finish = Message::agent_workflow_finish(last_index);
        self.apply_transition(session, vec![markdown, finish], OrchestratorState::Terminal).await
    }
}

/// Whether an agent invocation may be in flight for this session — broader
/// than [`OrchestratorState::is_active`], since it also covers `Validating`.
/// Used to decide whether a cancellation or a tool failure should interrupt
/// the current drive loop.
fn state_is_running(state: &OrchestratorState) -> bool {
    !matches!(
        state,
        OrchestratorState::Idle | OrchestratorState::Terminal | OrchestratorState::AwaitingHuman(..)
    )
}

/// Every outbound wire event is derived from a history [`Message`], never
/// stored independently (§3). Not every message kind has a wire
/// counterpart — `tool_call`/`tool_result`/user-originated entries are
/// internal bookkeeping only.
fn derive_outbound_event(message: &Message) -> Option<OutboundEvent> {
    match &message.kind {
        MessageKind::AgentMarkdown { text } => Some(OutboundEvent::markdown(text)),
        MessageKind::AgentProgress { status } => Some(OutboundEvent::progress(status, None, None)),
        MessageKind::AgentStep {
            step_index,
            total_steps,
            title,
        } => Some(OutboundEvent::progress(title, Some(step_index + 1), Some(*total_steps))),
        MessageKind::AgentFormRequest { form, .. } => {
            serde_json::from_value::<FormSpec>(form.clone()).ok().map(OutboundEvent::form_request)
        }
        MessageKind::AgentWorkflowFinish => Some(OutboundEvent::workflow_finish()),
        MessageKind::UserText { .. }
        | MessageKind::UserFormReply { .. }
        | MessageKind::UserAttachmentRef { .. }
        | MessageKind::ToolCall { .. }
        | MessageKind::ToolResult { .. }
        | MessageKind::SystemNote { .. } => None,
    }
}
