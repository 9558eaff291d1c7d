//! # Workflow Definitions
//!
//! A workflow is immutable data: an initial state, an optional start hook,
//! and either an ordered map of phases or a single agent with an `until`
//! predicate. Agents are data too: a provider binding, an output schema,
//! and two pure functions (`prompt` renders state into a prompt, `update`
//! folds validated output back into state). There is no inheritance and
//! no runtime mutation of definitions; the runtime interprets these
//! values.

pub mod builder;

pub use builder::WorkflowBuilder;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;

use crate::provider::{AgentProvider, ToolDefinition};
use crate::schema::Schema;

/// `start(input, draft)`: seed the draft state from the session input.
pub type StartFn = Arc<dyn Fn(&Value, &mut Value) + Send + Sync>;

/// `prompt(state) -> String`: render the agent prompt from current state.
pub type PromptFn = Arc<dyn Fn(&Value) -> String + Send + Sync>;

/// `update(output, draft)`: fold validated agent output into the draft
/// state. Must be pure and deterministic; replay depends on it.
pub type UpdateFn = Arc<dyn Fn(&Value, &mut Value) + Send + Sync>;

/// `until(state) -> bool`: loop-termination predicate for iterative
/// workflows.
pub type UntilFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Fold a user reply into the draft state.
pub type ReplyFn = Arc<dyn Fn(&PromptReply, &mut Value) + Send + Sync>;

/// Fold an inbound hub message into the draft state.
pub type MessageFn = Arc<dyn Fn(&Value, &mut Value) + Send + Sync>;

/// A reply resolving a `session:prompt`.
#[derive(Debug, Clone)]
pub struct PromptReply {
    pub prompt_id: Uuid,
    pub content: String,
    pub choice: Option<String>,
}

/// An agent bound into a workflow: data plus pure functions.
pub struct AgentSpec {
    pub name: String,
    pub provider: Arc<dyn AgentProvider>,
    pub output_schema: Schema,
    pub prompt: PromptFn,
    pub update: UpdateFn,
    pub tools: Vec<ToolDefinition>,
    /// Continue with the next phase when this step fails, instead of
    /// failing the workflow.
    pub continue_on_error: bool,
    /// Wall-clock bound for one provider call; falls back to the runtime
    /// default when unset.
    pub timeout: Option<Duration>,
}

impl AgentSpec {
    pub fn new(
        name: impl Into<String>,
        provider: Arc<dyn AgentProvider>,
        output_schema: Schema,
        prompt: impl Fn(&Value) -> String + Send + Sync + 'static,
        update: impl Fn(&Value, &mut Value) + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            provider,
            output_schema,
            prompt: Arc::new(prompt),
            update: Arc::new(update),
            tools: Vec::new(),
            continue_on_error: false,
            timeout: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }
}

impl std::fmt::Debug for AgentSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSpec")
            .field("name", &self.name)
            .field("provider", &self.provider.name())
            .field("continue_on_error", &self.continue_on_error)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// A single phase entry.
pub enum WorkflowStep {
    /// Run an agent, then move to `next`.
    Agent { run: Arc<AgentSpec>, next: String },
    /// Run a nested workflow as a task group, then move to `next`.
    Workflow {
        run: Arc<WorkflowDefinition>,
        next: String,
    },
    /// Ask the user, fold the reply into state, then move to `next`.
    Prompt {
        prompt: PromptFn,
        choices: Option<Vec<String>>,
        apply: ReplyFn,
        next: String,
    },
    /// The single exit of a phased workflow.
    Terminal,
}

impl WorkflowStep {
    pub fn next_phase(&self) -> Option<&str> {
        match self {
            WorkflowStep::Agent { next, .. }
            | WorkflowStep::Workflow { next, .. }
            | WorkflowStep::Prompt { next, .. } => Some(next),
            WorkflowStep::Terminal => None,
        }
    }
}

impl std::fmt::Debug for WorkflowStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStep::Agent { run, next } => f
                .debug_struct("Agent")
                .field("run", &run.name)
                .field("next", next)
                .finish(),
            WorkflowStep::Workflow { run, next } => f
                .debug_struct("Workflow")
                .field("run", &run.name)
                .field("next", next)
                .finish(),
            WorkflowStep::Prompt { next, .. } => {
                f.debug_struct("Prompt").field("next", next).finish_non_exhaustive()
            }
            WorkflowStep::Terminal => f.write_str("Terminal"),
        }
    }
}

/// How the workflow advances.
pub enum WorkflowKind {
    /// Named phases in definition order; execution starts at the first.
    Phased {
        phases: Vec<(String, WorkflowStep)>,
    },
    /// One agent repeated until the predicate holds on the state.
    Iterative {
        agent: Arc<AgentSpec>,
        until: UntilFn,
    },
}

/// A compiled, immutable workflow.
pub struct WorkflowDefinition {
    pub name: String,
    pub initial_state: Value,
    pub start: Option<StartFn>,
    pub kind: WorkflowKind,
    /// Optional handler for coarse inbound hub messages.
    pub on_message: Option<MessageFn>,
}

impl WorkflowDefinition {
    pub fn entry_phase(&self) -> Option<&str> {
        match &self.kind {
            WorkflowKind::Phased { phases } => phases.first().map(|(name, _)| name.as_str()),
            WorkflowKind::Iterative { .. } => None,
        }
    }

    pub fn phase(&self, name: &str) -> Option<&WorkflowStep> {
        match &self.kind {
            WorkflowKind::Phased { phases } => phases
                .iter()
                .find(|(phase, _)| phase == name)
                .map(|(_, step)| step),
            WorkflowKind::Iterative { .. } => None,
        }
    }

    /// 1-based position of a phase in definition order, for
    /// `phase:start{number}` payloads.
    pub fn phase_number(&self, name: &str) -> Option<usize> {
        match &self.kind {
            WorkflowKind::Phased { phases } => phases
                .iter()
                .position(|(phase, _)| phase == name)
                .map(|i| i + 1),
            WorkflowKind::Iterative { .. } => None,
        }
    }
}

impl std::fmt::Debug for WorkflowDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            WorkflowKind::Phased { phases } => format!("phased({})", phases.len()),
            WorkflowKind::Iterative { agent, .. } => format!("iterative({})", agent.name),
        };
        f.debug_struct("WorkflowDefinition")
            .field("name", &self.name)
            .field("kind", &kind)
            .finish_non_exhaustive()
    }
}
