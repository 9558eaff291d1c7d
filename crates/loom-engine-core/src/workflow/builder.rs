//! # Workflow Builder
//!
//! Construction and build-time validation of workflow definitions. The
//! builder rejects structurally broken workflows before anything runs:
//! dangling `next` references, zero or multiple terminals, phases the
//! entry can never reach, and cycles that bypass the terminal.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{CoreError, Result};

use super::{
    AgentSpec, MessageFn, PromptFn, ReplyFn, UntilFn, WorkflowDefinition, WorkflowKind,
    WorkflowStep,
};

enum BuilderKind {
    Unset,
    Phased(Vec<(String, WorkflowStep)>),
    Iterative { agent: Arc<AgentSpec>, until: UntilFn },
}

pub struct WorkflowBuilder {
    name: String,
    initial_state: Value,
    start: Option<super::StartFn>,
    kind: BuilderKind,
    on_message: Option<MessageFn>,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initial_state: Value::Object(Default::default()),
            start: None,
            kind: BuilderKind::Unset,
            on_message: None,
        }
    }

    pub fn initial_state(mut self, state: Value) -> Self {
        self.initial_state = state;
        self
    }

    /// Seed the draft state from the session input before the first phase.
    pub fn on_start(
        mut self,
        start: impl Fn(&Value, &mut Value) + Send + Sync + 'static,
    ) -> Self {
        self.start = Some(Arc::new(start));
        self
    }

    /// Handle coarse inbound messages by folding them into state.
    pub fn on_message(
        mut self,
        handler: impl Fn(&Value, &mut Value) + Send + Sync + 'static,
    ) -> Self {
        self.on_message = Some(Arc::new(handler));
        self
    }

    /// Add an agent phase. The first phase added is the entry.
    pub fn agent_phase(
        self,
        name: impl Into<String>,
        agent: Arc<AgentSpec>,
        next: impl Into<String>,
    ) -> Self {
        self.push_phase(
            name.into(),
            WorkflowStep::Agent {
                run: agent,
                next: next.into(),
            },
        )
    }

    /// Add a nested-workflow phase, executed as a task group.
    pub fn workflow_phase(
        self,
        name: impl Into<String>,
        workflow: Arc<WorkflowDefinition>,
        next: impl Into<String>,
    ) -> Self {
        self.push_phase(
            name.into(),
            WorkflowStep::Workflow {
                run: workflow,
                next: next.into(),
            },
        )
    }

    /// Add an interactive phase that awaits a user reply.
    pub fn prompt_phase(
        self,
        name: impl Into<String>,
        prompt: impl Fn(&Value) -> String + Send + Sync + 'static,
        choices: Option<Vec<String>>,
        apply: impl Fn(&super::PromptReply, &mut Value) + Send + Sync + 'static,
        next: impl Into<String>,
    ) -> Self {
        let prompt: PromptFn = Arc::new(prompt);
        let apply: ReplyFn = Arc::new(apply);
        self.push_phase(
            name.into(),
            WorkflowStep::Prompt {
                prompt,
                choices,
                apply,
                next: next.into(),
            },
        )
    }

    /// Declare the terminal phase.
    pub fn terminal(self, name: impl Into<String>) -> Self {
        self.push_phase(name.into(), WorkflowStep::Terminal)
    }

    /// Simplified form: one agent repeated until the predicate holds.
    pub fn run_until(
        mut self,
        agent: Arc<AgentSpec>,
        until: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.kind = BuilderKind::Iterative {
            agent,
            until: Arc::new(until),
        };
        self
    }

    fn push_phase(mut self, name: String, step: WorkflowStep) -> Self {
        match &mut self.kind {
            BuilderKind::Phased(phases) => phases.push((name, step)),
            _ => self.kind = BuilderKind::Phased(vec![(name, step)]),
        }
        self
    }

    pub fn build(self) -> Result<WorkflowDefinition> {
        let WorkflowBuilder {
            name,
            initial_state,
            start,
            kind,
            on_message,
        } = self;
        let kind = match kind {
            BuilderKind::Unset => {
                return Err(CoreError::InvalidDefinition {
                    workflow: name,
                    message: "workflow has no phases and no agent".to_string(),
                });
            }
            BuilderKind::Iterative { agent, until } => WorkflowKind::Iterative { agent, until },
            BuilderKind::Phased(phases) => {
                validate_phases(&name, &phases)?;
                WorkflowKind::Phased { phases }
            }
        };
        Ok(WorkflowDefinition {
            name,
            initial_state,
            start,
            kind,
            on_message,
        })
    }
}

fn validate_phases(workflow: &str, phases: &[(String, WorkflowStep)]) -> Result<()> {
    let invalid = |message: String| CoreError::InvalidDefinition {
        workflow: workflow.to_string(),
        message,
    };

    let mut seen = HashSet::new();
    for (name, _) in phases {
        if !seen.insert(name.as_str()) {
            return Err(invalid(format!("duplicate phase {name:?}")));
        }
    }

    let terminals: Vec<&str> = phases
        .iter()
        .filter(|(_, step)| matches!(step, WorkflowStep::Terminal))
        .map(|(name, _)| name.as_str())
        .collect();
    match terminals.len() {
        0 => return Err(invalid("no terminal phase".to_string())),
        1 => {}
        _ => {
            return Err(invalid(format!(
                "multiple terminal phases: {terminals:?}"
            )))
        }
    }

    for (name, step) in phases {
        if let Some(next) = step.next_phase() {
            if !seen.contains(next) {
                return Err(invalid(format!(
                    "phase {name:?} references unknown phase {next:?}"
                )));
            }
        }
    }

    // Follow the successor chain from the entry. Each non-terminal phase
    // has exactly one successor, so revisiting a phase means a loop that
    // can never reach the terminal.
    let mut visited = HashSet::new();
    let mut current = phases[0].0.as_str();
    loop {
        if !visited.insert(current) {
            return Err(invalid(format!(
                "cycle through phase {current:?} never reaches the terminal"
            )));
        }
        let step = phases
            .iter()
            .find(|(name, _)| name == current)
            .map(|(_, step)| step)
            .expect("references validated above");
        match step.next_phase() {
            Some(next) => current = next,
            None => break,
        }
    }

    let unreachable: Vec<&str> = phases
        .iter()
        .map(|(name, _)| name.as_str())
        .filter(|name| !visited.contains(name))
        .collect();
    if !unreachable.is_empty() {
        return Err(invalid(format!("unreachable phases: {unreachable:?}")));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::scripted::ScriptedProvider;
    use crate::schema::Schema;
    use serde_json::json;

    fn agent(name: &str) -> Arc<AgentSpec> {
        Arc::new(AgentSpec::new(
            name,
            Arc::new(ScriptedProvider::new("scripted", "test-model")),
            Schema::any(),
            |_state| String::new(),
            |_output, _draft| {},
        ))
    }

    #[test]
    fn valid_two_phase_workflow_builds() {
        let wf = WorkflowBuilder::new("math")
            .initial_state(json!({"goal": ""}))
            .agent_phase("solve", agent("solver"), "done")
            .terminal("done")
            .build()
            .unwrap();

        assert_eq!(wf.entry_phase(), Some("solve"));
        assert_eq!(wf.phase_number("solve"), Some(1));
        assert!(matches!(wf.phase("done"), Some(WorkflowStep::Terminal)));
    }

    #[test]
    fn dangling_next_is_rejected() {
        let err = WorkflowBuilder::new("broken")
            .agent_phase("solve", agent("solver"), "missing")
            .terminal("done")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("unknown phase"));
    }

    #[test]
    fn terminal_is_mandatory_and_unique() {
        let none = WorkflowBuilder::new("no-exit")
            .agent_phase("a", agent("x"), "a")
            .build()
            .unwrap_err();
        assert!(none.to_string().contains("no terminal"));

        let two = WorkflowBuilder::new("two-exits")
            .agent_phase("a", agent("x"), "t1")
            .terminal("t1")
            .terminal("t2")
            .build()
            .unwrap_err();
        assert!(two.to_string().contains("multiple terminal"));
    }

    #[test]
    fn entry_loop_is_rejected() {
        let err = WorkflowBuilder::new("loop")
            .agent_phase("a", agent("x"), "b")
            .agent_phase("b", agent("y"), "a")
            .terminal("t")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn orphan_phase_is_rejected() {
        let err = WorkflowBuilder::new("orphan")
            .agent_phase("a", agent("x"), "t")
            .terminal("t")
            .agent_phase("island", agent("y"), "t")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("unreachable"));
    }

    #[test]
    fn iterative_workflow_builds_without_phases() {
        let wf = WorkflowBuilder::new("loop-until")
            .initial_state(json!({"done": false}))
            .run_until(agent("worker"), |state| {
                state["done"].as_bool().unwrap_or(false)
            })
            .build()
            .unwrap();
        assert!(wf.entry_phase().is_none());
        assert!(matches!(wf.kind, WorkflowKind::Iterative { .. }));
    }
}
