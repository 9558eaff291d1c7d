//! # Workflow Runtime
//!
//! The state-machine interpreter for one session. The runtime walks a
//! workflow definition, invokes agent providers, and persists every
//! observable transition as an event. Two rules anchor everything:
//!
//! 1. **Append, then publish.** Every event is durably appended to the
//!    event store before it is published to the bus. A subscriber can
//!    never observe an event that a post-crash replay would not also see.
//! 2. **State is the log.** The in-memory working state is a convenience;
//!    the canonical state is always the payload of the last
//!    `state:updated` event. Pause, resume, and fork all lean on that.
//!
//! A runtime owns its session exclusively and runs on its own task.
//! Control (pause, abort, replies, hub messages) arrives over a command
//! channel and is honored at the next suspension point, including
//! mid-stream where the in-flight provider call is cancelled through its
//! token.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use futures_util::StreamExt;

use crate::error::{CoreError, Result, RetryPolicy};
use crate::event::bus::EventBus;
use crate::event::snapshot::{StateSnapshot, StateSnapshotStore};
use crate::event::store::EventStore;
use crate::event::{Event, EventName, EventRecord};
use crate::provider::recorder::ProviderRecorder;
use crate::provider::recording::RecordingProvider;
use crate::provider::{
    AgentProvider, AgentResult, AgentStream, AgentStreamEvent, ExecutionMode, StreamOptions,
};
use crate::state::{current_state, SessionStatus};
use crate::workflow::{
    AgentSpec, MessageFn, PromptReply, WorkflowDefinition, WorkflowKind, WorkflowStep,
};

/// Runtime tuning knobs shared by all sessions of a scaffold.
#[derive(Clone)]
pub struct RuntimeOptions {
    pub retry: RetryPolicy,
    /// Default wall-clock bound per provider call; an agent's own timeout
    /// takes precedence.
    pub step_timeout: Option<Duration>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            step_timeout: None,
        }
    }
}

/// Shared services a runtime needs; cloned per session by the scaffold.
#[derive(Clone)]
pub struct RuntimeContext {
    pub store: Arc<dyn EventStore>,
    pub snapshots: Option<Arc<dyn StateSnapshotStore>>,
    pub recorder: Arc<dyn ProviderRecorder>,
    pub mode: ExecutionMode,
    pub bus: EventBus,
    pub options: RuntimeOptions,
}

/// Inbound control for a running session.
#[derive(Debug)]
pub enum RuntimeCommand {
    /// Cooperatively stop after the current suspension point, leaving the
    /// session resumable.
    Pause,
    /// Cooperatively stop for good.
    Abort { reason: Option<String> },
    /// Resolve an outstanding `session:prompt`.
    Reply(PromptReply),
    /// Coarse message for the workflow's own handler. `target` narrows
    /// delivery to a named phase.
    Message {
        target: Option<String>,
        body: Value,
    },
}

/// What a finished (or stopped) run reports back.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub completed: bool,
    pub state: Option<Value>,
}

enum Interrupt {
    Paused,
    Aborted { reason: Option<String> },
}

enum Flow {
    Completed,
    Failed { code: String },
    Interrupted(Interrupt),
}

enum StepOutcome {
    Done,
    Failed { code: String },
    Interrupted(Interrupt),
}

enum Consumed {
    Result(AgentResult),
    Error(CoreError),
    Interrupted(Interrupt),
    EndedWithoutResult,
}

/// Far enough ahead to stand in for "no deadline".
fn no_deadline() -> Instant {
    Instant::now() + Duration::from_secs(60 * 60 * 24 * 365)
}

pub struct WorkflowRuntime {
    session_id: Uuid,
    ctx: RuntimeContext,
    commands: mpsc::Receiver<RuntimeCommand>,
    commands_open: bool,
    pending_messages: Vec<(Option<String>, Value)>,
    message_handler: Option<MessageFn>,
}

impl WorkflowRuntime {
    pub fn new(
        session_id: Uuid,
        ctx: RuntimeContext,
        commands: mpsc::Receiver<RuntimeCommand>,
    ) -> Self {
        Self {
            session_id,
            ctx,
            commands,
            commands_open: true,
            pending_messages: Vec::new(),
            message_handler: None,
        }
    }

    /// A runtime with no external controller, for direct driving.
    pub fn detached(session_id: Uuid, ctx: RuntimeContext) -> Self {
        let (_tx, rx) = mpsc::channel(1);
        Self::new(session_id, ctx, rx)
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Run a workflow to completion (or until paused/aborted/failed).
    pub async fn execute(
        mut self,
        workflow: Arc<WorkflowDefinition>,
        input: Value,
    ) -> Result<RunOutcome> {
        let started = Instant::now();
        info!(session_id = %self.session_id, workflow = %workflow.name, "workflow starting");
        self.message_handler = workflow.on_message.clone();

        self.emit(
            EventName::WorkflowStarted,
            json!({
                "session_id": self.session_id,
                "workflow_name": workflow.name,
                "input": input,
            }),
        )
        .await?;

        let mut state = workflow.initial_state.clone();
        if let Some(start) = &workflow.start {
            start(&input, &mut state);
        }
        self.emit_state(&state).await?;

        self.drive(&workflow, state, None, started).await
    }

    /// Continue a session from its recorded history: replay state, find
    /// the last unfinished step, and rerun it from scratch.
    pub async fn resume(mut self, workflow: Arc<WorkflowDefinition>) -> Result<RunOutcome> {
        let events = self.ctx.store.events(self.session_id).await?;
        if events.is_empty() {
            return Err(CoreError::SessionNotFound {
                session_id: self.session_id,
            });
        }

        let status = SessionStatus::from_events(&events);
        if status.is_terminal() {
            // Nothing to do; terminal sessions are immutable.
            return Ok(RunOutcome {
                completed: status == SessionStatus::Completed,
                state: current_state(&events),
            });
        }

        let started = Instant::now();
        info!(session_id = %self.session_id, workflow = %workflow.name, "workflow resuming");
        self.message_handler = workflow.on_message.clone();
        self.emit(EventName::SessionResumed, json!({})).await?;

        let state = match current_state(&events) {
            Some(state) => state,
            None => {
                // Interrupted before the first state intent: rebuild it
                // from the recorded input.
                let input = events
                    .iter()
                    .find(|e| e.name == EventName::WorkflowStarted)
                    .and_then(|e| e.payload.get("input").cloned())
                    .unwrap_or(Value::Null);
                let mut state = workflow.initial_state.clone();
                if let Some(start) = &workflow.start {
                    start(&input, &mut state);
                }
                self.emit_state(&state).await?;
                state
            }
        };

        let resume_at = find_resume_phase(&events, &workflow);
        debug!(session_id = %self.session_id, ?resume_at, "resume point selected");
        self.drive(&workflow, state, resume_at, started).await
    }

    async fn drive(
        &mut self,
        workflow: &Arc<WorkflowDefinition>,
        mut state: Value,
        resume_at: Option<String>,
        started: Instant,
    ) -> Result<RunOutcome> {
        let flow = self.run_kind(workflow, &mut state, resume_at).await?;
        let state = Some(state);
        match flow {
            Flow::Completed => {
                self.emit_terminal(
                    EventName::WorkflowCompleted,
                    json!({
                        "success": true,
                        "duration_ms": started.elapsed().as_millis() as u64,
                    }),
                )
                .await?;
                info!(session_id = %self.session_id, "workflow completed");
                Ok(RunOutcome {
                    completed: true,
                    state,
                })
            }
            Flow::Failed { code } => {
                self.emit_terminal(EventName::WorkflowFailed, json!({"code": code}))
                    .await?;
                warn!(session_id = %self.session_id, %code, "workflow failed");
                Ok(RunOutcome {
                    completed: false,
                    state,
                })
            }
            Flow::Interrupted(Interrupt::Paused) => {
                self.emit(EventName::SessionPaused, json!({})).await?;
                info!(session_id = %self.session_id, "session paused");
                Ok(RunOutcome {
                    completed: false,
                    state,
                })
            }
            Flow::Interrupted(Interrupt::Aborted { reason }) => {
                self.emit_terminal(EventName::SessionAborted, json!({"reason": reason}))
                    .await?;
                info!(session_id = %self.session_id, "session aborted");
                Ok(RunOutcome {
                    completed: false,
                    state,
                })
            }
        }
    }

    fn run_kind<'a>(
        &'a mut self,
        workflow: &'a WorkflowDefinition,
        state: &'a mut Value,
        resume_at: Option<String>,
    ) -> futures_util::future::BoxFuture<'a, Result<Flow>> {
        Box::pin(async move {
            match &workflow.kind {
                WorkflowKind::Phased { .. } => {
                    self.run_phases(workflow, state, resume_at).await
                }
                WorkflowKind::Iterative { agent, until } => {
                    let until = until.clone();
                    let agent = agent.clone();
                    loop {
                        if let Some(interrupt) = self.drain_commands(state, None).await? {
                            return Ok(Flow::Interrupted(interrupt));
                        }
                        if until(state) {
                            return Ok(Flow::Completed);
                        }
                        match self.run_agent(&agent, state).await? {
                            StepOutcome::Done => {}
                            StepOutcome::Failed { code } => {
                                if !agent.continue_on_error {
                                    return Ok(Flow::Failed { code });
                                }
                            }
                            StepOutcome::Interrupted(i) => return Ok(Flow::Interrupted(i)),
                        }
                    }
                }
            }
        })
    }

    async fn run_phases(
        &mut self,
        workflow: &WorkflowDefinition,
        state: &mut Value,
        resume_at: Option<String>,
    ) -> Result<Flow> {
        let mut current = match resume_at.or_else(|| workflow.entry_phase().map(String::from)) {
            Some(phase) => phase,
            None => return Ok(Flow::Completed),
        };

        loop {
            if let Some(interrupt) = self.drain_commands(state, Some(&current)).await? {
                return Ok(Flow::Interrupted(interrupt));
            }

            let step = workflow.phase(&current).ok_or_else(|| {
                CoreError::InvalidDefinition {
                    workflow: workflow.name.clone(),
                    message: format!("phase {current:?} disappeared at runtime"),
                }
            })?;
            let number = workflow.phase_number(&current);

            match step {
                WorkflowStep::Terminal => return Ok(Flow::Completed),

                WorkflowStep::Agent { run, next } => {
                    let run = run.clone();
                    let next = next.clone();
                    self.emit_phase(EventName::PhaseStart, &current, number).await?;
                    match self.run_agent(&run, state).await? {
                        StepOutcome::Done => {
                            self.emit_phase(EventName::PhaseComplete, &current, number)
                                .await?;
                            current = next;
                        }
                        StepOutcome::Failed { code } => {
                            if run.continue_on_error {
                                self.emit_phase(EventName::PhaseComplete, &current, number)
                                    .await?;
                                current = next;
                            } else {
                                return Ok(Flow::Failed { code });
                            }
                        }
                        StepOutcome::Interrupted(i) => return Ok(Flow::Interrupted(i)),
                    }
                }

                WorkflowStep::Workflow { run, next } => {
                    let child = run.clone();
                    let next = next.clone();
                    self.emit_phase(EventName::PhaseStart, &current, number).await?;
                    self.emit(EventName::TaskStart, json!({"name": child.name}))
                        .await?;
                    match self.run_kind(&child, state, None).await? {
                        Flow::Completed => {
                            self.emit(EventName::TaskComplete, json!({"name": child.name}))
                                .await?;
                            self.emit_phase(EventName::PhaseComplete, &current, number)
                                .await?;
                            current = next;
                        }
                        Flow::Failed { code } => {
                            self.emit(
                                EventName::TaskFailed,
                                json!({"name": child.name, "code": code}),
                            )
                            .await?;
                            return Ok(Flow::Failed { code });
                        }
                        Flow::Interrupted(i) => return Ok(Flow::Interrupted(i)),
                    }
                }

                WorkflowStep::Prompt {
                    prompt,
                    choices,
                    apply,
                    next,
                } => {
                    let prompt = prompt(state);
                    let choices = choices.clone();
                    let apply = apply.clone();
                    let next = next.clone();
                    self.emit_phase(EventName::PhaseStart, &current, number).await?;
                    match self.await_reply(prompt, choices).await? {
                        Ok(reply) => {
                            apply(&reply, state);
                            self.emit_state(state).await?;
                            self.emit_phase(EventName::PhaseComplete, &current, number)
                                .await?;
                            current = next;
                        }
                        Err(interrupt) => return Ok(Flow::Interrupted(interrupt)),
                    }
                }
            }
        }
    }

    /// One agent step: stream, re-tag, validate, reduce. Retries transient
    /// provider failures with backoff.
    async fn run_agent(&mut self, agent: &AgentSpec, state: &mut Value) -> Result<StepOutcome> {
        self.emit(EventName::AgentStarted, json!({"agent": agent.name}))
            .await?;

        let mut attempt: u32 = 1;
        loop {
            let cancel = CancellationToken::new();
            let prompt = (agent.prompt)(&*state);
            let provider = RecordingProvider::new(
                agent.provider.clone(),
                self.ctx.recorder.clone(),
                self.ctx.mode,
            );
            let options = StreamOptions {
                prompt,
                tools: agent.tools.clone(),
                output_schema: Some(agent.output_schema.clone()),
                provider_options: None,
                resume: None,
                cancel: cancel.clone(),
            };
            let deadline = agent
                .timeout
                .or(self.ctx.options.step_timeout)
                .map(|t| Instant::now() + t)
                .unwrap_or_else(no_deadline);

            let stream = provider.stream(options);
            match self.consume_stream(agent, stream, &cancel, deadline).await? {
                Consumed::Result(result) => {
                    return self.settle_result(agent, result, state).await;
                }
                Consumed::EndedWithoutResult => {
                    let err: CoreError = crate::error::ProviderError::fatal(
                        "agent stream ended without a result",
                    )
                    .into();
                    return self.settle_failure(agent, err).await;
                }
                Consumed::Error(err) => {
                    if err.is_retryable() && self.ctx.options.retry.allows(attempt) {
                        let delay = match &err {
                            CoreError::Provider(p) => p
                                .retry_after_ms
                                .map(Duration::from_millis)
                                .unwrap_or_else(|| self.ctx.options.retry.delay_for(attempt)),
                            _ => self.ctx.options.retry.delay_for(attempt),
                        };
                        self.emit(
                            EventName::AgentRetry,
                            json!({
                                "agent": agent.name,
                                "attempt": attempt,
                                "delay_ms": delay.as_millis() as u64,
                                "reason": err.to_string(),
                            }),
                        )
                        .await?;
                        if let Some(interrupt) = self.backoff(delay).await {
                            return Ok(StepOutcome::Interrupted(interrupt));
                        }
                        attempt += 1;
                        continue;
                    }
                    return self.settle_failure(agent, err).await;
                }
                Consumed::Interrupted(interrupt) => {
                    return Ok(StepOutcome::Interrupted(interrupt))
                }
            }
        }
    }

    async fn settle_result(
        &mut self,
        agent: &AgentSpec,
        result: AgentResult,
        state: &mut Value,
    ) -> Result<StepOutcome> {
        if let Err(err) = agent.output_schema.validate(&result.output) {
            self.emit(
                EventName::AgentFailed,
                json!({
                    "agent": agent.name,
                    "reason": "VALIDATION_ERROR",
                    "message": err.message,
                    "path": err.path,
                }),
            )
            .await?;
            return Ok(StepOutcome::Failed {
                code: "VALIDATION_ERROR".to_string(),
            });
        }

        self.emit(
            EventName::AgentCompleted,
            json!({
                "agent": agent.name,
                "success": true,
                "output": result.output,
                "usage": result.usage,
            }),
        )
        .await?;

        let mut draft = state.clone();
        (agent.update)(&result.output, &mut draft);
        *state = draft;
        self.emit_state(state).await?;
        Ok(StepOutcome::Done)
    }

    async fn settle_failure(&mut self, agent: &AgentSpec, err: CoreError) -> Result<StepOutcome> {
        let code = match &err {
            CoreError::Provider(p) => p.code.to_string(),
            CoreError::RecordingNotFound { .. } => "RECORDING_NOT_FOUND".to_string(),
            _ => "INTERNAL".to_string(),
        };
        warn!(session_id = %self.session_id, agent = %agent.name, %err, "agent failed");
        self.emit(
            EventName::AgentFailed,
            json!({
                "agent": agent.name,
                "code": code,
                "message": err.to_string(),
            }),
        )
        .await?;
        Ok(StepOutcome::Failed { code })
    }

    /// Pump one provider stream, re-tagging events for the session log,
    /// reacting to control commands and the step deadline as they land.
    async fn consume_stream(
        &mut self,
        agent: &AgentSpec,
        mut stream: AgentStream,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> Result<Consumed> {
        loop {
            tokio::select! {
                biased;

                cmd = self.commands.recv(), if self.commands_open => {
                    match cmd {
                        Some(RuntimeCommand::Pause) => {
                            cancel.cancel();
                            return Ok(Consumed::Interrupted(Interrupt::Paused));
                        }
                        Some(RuntimeCommand::Abort { reason }) => {
                            cancel.cancel();
                            return Ok(Consumed::Interrupted(Interrupt::Aborted { reason }));
                        }
                        Some(RuntimeCommand::Reply(reply)) => {
                            warn!(prompt_id = %reply.prompt_id, "reply received while no prompt is outstanding");
                        }
                        Some(RuntimeCommand::Message { target, body }) => {
                            self.pending_messages.push((target, body));
                        }
                        None => {
                            self.commands_open = false;
                        }
                    }
                }

                _ = tokio::time::sleep_until(deadline) => {
                    cancel.cancel();
                    return Ok(Consumed::Error(
                        crate::error::ProviderError::network("agent call exceeded its deadline")
                            .into(),
                    ));
                }

                item = stream.next() => {
                    match item {
                        Some(Ok(event)) => {
                            self.emit_agent_event(agent, &event).await?;
                            if let AgentStreamEvent::Result(result) = event {
                                return Ok(Consumed::Result(result));
                            }
                        }
                        Some(Err(err)) => return Ok(Consumed::Error(err)),
                        None => return Ok(Consumed::EndedWithoutResult),
                    }
                }
            }
        }
    }

    /// Emit `session:prompt` and park until the matching reply arrives.
    async fn await_reply(
        &mut self,
        prompt: String,
        choices: Option<Vec<String>>,
    ) -> Result<std::result::Result<PromptReply, Interrupt>> {
        let prompt_id = Uuid::new_v4();
        self.emit(
            EventName::SessionPrompt,
            json!({
                "prompt_id": prompt_id,
                "prompt": prompt,
                "choices": choices,
            }),
        )
        .await?;

        loop {
            if !self.commands_open {
                // No controller can ever answer; aborting beats hanging.
                return Ok(Err(Interrupt::Aborted {
                    reason: Some("command channel closed while awaiting input".to_string()),
                }));
            }
            match self.commands.recv().await {
                Some(RuntimeCommand::Reply(reply)) if reply.prompt_id == prompt_id => {
                    self.emit(
                        EventName::SessionReply,
                        json!({
                            "prompt_id": reply.prompt_id,
                            "content": reply.content,
                            "choice": reply.choice,
                        }),
                    )
                    .await?;
                    return Ok(Ok(reply));
                }
                Some(RuntimeCommand::Reply(stale)) => {
                    warn!(prompt_id = %stale.prompt_id, expected = %prompt_id, "stale reply ignored");
                }
                Some(RuntimeCommand::Pause) => return Ok(Err(Interrupt::Paused)),
                Some(RuntimeCommand::Abort { reason }) => {
                    return Ok(Err(Interrupt::Aborted { reason }))
                }
                Some(RuntimeCommand::Message { target, body }) => {
                    self.pending_messages.push((target, body));
                }
                None => {
                    self.commands_open = false;
                }
            }
        }
    }

    /// Interruptible backoff sleep between retry attempts.
    async fn backoff(&mut self, delay: Duration) -> Option<Interrupt> {
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return None,
                cmd = self.commands.recv(), if self.commands_open => match cmd {
                    Some(RuntimeCommand::Pause) => return Some(Interrupt::Paused),
                    Some(RuntimeCommand::Abort { reason }) => {
                        return Some(Interrupt::Aborted { reason })
                    }
                    Some(RuntimeCommand::Reply(reply)) => {
                        warn!(prompt_id = %reply.prompt_id, "reply received during backoff");
                    }
                    Some(RuntimeCommand::Message { target, body }) => {
                        self.pending_messages.push((target, body));
                    }
                    None => {
                        self.commands_open = false;
                    }
                },
            }
        }
    }

    /// Poll queued control without blocking, then deliver any pending hub
    /// messages that target the current phase (or are untargeted).
    async fn drain_commands(
        &mut self,
        state: &mut Value,
        current_phase: Option<&str>,
    ) -> Result<Option<Interrupt>> {
        loop {
            match self.commands.try_recv() {
                Ok(RuntimeCommand::Pause) => return Ok(Some(Interrupt::Paused)),
                Ok(RuntimeCommand::Abort { reason }) => {
                    return Ok(Some(Interrupt::Aborted { reason }))
                }
                Ok(RuntimeCommand::Reply(reply)) => {
                    warn!(prompt_id = %reply.prompt_id, "reply received while no prompt is outstanding");
                }
                Ok(RuntimeCommand::Message { target, body }) => {
                    self.pending_messages.push((target, body));
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.commands_open = false;
                    break;
                }
            }
        }

        if !self.pending_messages.is_empty() {
            if let Some(handler) = self.message_handler.clone() {
                let mut delivered = false;
                let mut remaining = Vec::new();
                for (target, body) in self.pending_messages.drain(..) {
                    let applies = match (&target, current_phase) {
                        (None, _) => true,
                        (Some(t), Some(phase)) => t == phase,
                        (Some(_), None) => false,
                    };
                    if applies {
                        handler(&body, state);
                        delivered = true;
                    } else {
                        remaining.push((target, body));
                    }
                }
                self.pending_messages = remaining;
                if delivered {
                    self.emit_state(state).await?;
                }
            } else {
                debug!(
                    session_id = %self.session_id,
                    dropped = self.pending_messages.len(),
                    "workflow has no message handler; dropping inbound messages"
                );
                self.pending_messages.clear();
            }
        }

        Ok(None)
    }

    /// Append to the store, then publish. The order is the contract.
    async fn emit(&self, name: EventName, payload: Value) -> Result<Event> {
        let record = EventRecord::new(name, payload);
        let event = self.ctx.store.append(self.session_id, record).await?;
        self.ctx.bus.publish(&event);
        Ok(event)
    }

    async fn emit_phase(
        &self,
        name: EventName,
        phase: &str,
        number: Option<usize>,
    ) -> Result<Event> {
        self.emit(name, json!({"name": phase, "number": number}))
            .await
    }

    async fn emit_state(&self, state: &Value) -> Result<()> {
        let event = self
            .emit(EventName::StateUpdated, json!({"state": state}))
            .await?;
        if let Some(snapshots) = &self.ctx.snapshots {
            let snapshot =
                StateSnapshot::new(self.session_id, event.position + 1, state.clone());
            if let Err(err) = snapshots.save(snapshot).await {
                // Snapshots are advisory; replay stays authoritative.
                warn!(session_id = %self.session_id, %err, "snapshot save failed");
            }
        }
        Ok(())
    }

    /// Emit a terminal event unless the session already reached a
    /// terminal state (duplicate terminals are never appended).
    async fn emit_terminal(&self, name: EventName, payload: Value) -> Result<()> {
        let events = self.ctx.store.events(self.session_id).await?;
        if SessionStatus::from_events(&events).is_terminal() {
            debug!(session_id = %self.session_id, %name, "terminal already recorded; skipping");
            return Ok(());
        }
        self.emit(name, payload).await?;
        Ok(())
    }

    /// Re-tag one provider stream event into the session log. Bookkeeping
    /// events (stop, usage, session init, terminal result) fold into
    /// `agent:completed` instead of getting their own log entries.
    async fn emit_agent_event(&self, agent: &AgentSpec, event: &AgentStreamEvent) -> Result<()> {
        let tagged = match event {
            AgentStreamEvent::TextDelta { delta } => Some((
                EventName::AgentText,
                json!({"agent": agent.name, "delta": delta}),
            )),
            AgentStreamEvent::TextComplete { text } => Some((
                EventName::AgentText,
                json!({"agent": agent.name, "text": text}),
            )),
            AgentStreamEvent::ThinkingDelta { delta } => Some((
                EventName::AgentThinking,
                json!({"agent": agent.name, "delta": delta}),
            )),
            AgentStreamEvent::ThinkingComplete { thinking } => Some((
                EventName::AgentThinking,
                json!({"agent": agent.name, "thinking": thinking}),
            )),
            AgentStreamEvent::ToolCall {
                tool_id,
                tool_name,
                input,
            } => Some((
                EventName::AgentToolStart,
                json!({
                    "agent": agent.name,
                    "tool_id": tool_id,
                    "tool_name": tool_name,
                    "input": input,
                }),
            )),
            AgentStreamEvent::ToolResult {
                tool_id,
                output,
                is_error,
            } => Some((
                EventName::AgentToolComplete,
                json!({
                    "agent": agent.name,
                    "tool_id": tool_id,
                    "output": output,
                    "is_error": is_error,
                }),
            )),
            AgentStreamEvent::Stop { .. }
            | AgentStreamEvent::Usage { .. }
            | AgentStreamEvent::SessionInit { .. }
            | AgentStreamEvent::Result(_) => None,
        };
        if let Some((name, payload)) = tagged {
            self.emit(name, payload).await?;
        }
        Ok(())
    }
}

/// Pick the phase to rerun when resuming: the last top-level `phase:start`
/// without a matching `phase:complete`; otherwise the successor of the
/// last completed phase; otherwise the entry.
fn find_resume_phase(events: &[Event], workflow: &WorkflowDefinition) -> Option<String> {
    if !matches!(workflow.kind, WorkflowKind::Phased { .. }) {
        return None;
    }

    let mut open: Vec<String> = Vec::new();
    let mut last_completed: Option<String> = None;
    for event in events {
        let Some(name) = event.payload.get("name").and_then(|v| v.as_str()) else {
            continue;
        };
        // Nested workflows emit phase events too; only this workflow's
        // phases participate in top-level resume selection.
        if workflow.phase(name).is_none() {
            continue;
        }
        match event.name {
            EventName::PhaseStart => open.push(name.to_string()),
            EventName::PhaseComplete => {
                if let Some(pos) = open.iter().rposition(|p| p == name) {
                    open.remove(pos);
                }
                last_completed = Some(name.to_string());
            }
            _ => {}
        }
    }

    if let Some(unfinished) = open.into_iter().last() {
        return Some(unfinished);
    }
    if let Some(done) = last_completed {
        return workflow
            .phase(&done)
            .and_then(|step| step.next_phase())
            .map(String::from);
    }
    workflow.entry_phase().map(String::from)
}
